use anyhow::Result;

/// 只接受 http / https
pub fn is_valid_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(u) => matches!(u.scheme(), "http" | "https") && u.host_str().is_some(),
        Err(_) => false,
    }
}

pub fn validate_concurrency(concurrency: usize) -> Result<()> {
    if concurrency == 0 {
        anyhow::bail!("工作例程数必须大于0");
    }
    Ok(())
}

pub fn validate_chunk_size(chunk_size: u64) -> Result<()> {
    if chunk_size == 0 {
        anyhow::bail!("分片大小必须大于0");
    }
    Ok(())
}

pub fn validate_max_retry(max_retry: u32) -> Result<()> {
    if max_retry == 0 {
        anyhow::bail!("重试次数必须大于0");
    }
    Ok(())
}

pub fn validate_output_path(path: &str) -> Result<()> {
    if path.is_empty() {
        anyhow::bail!("输出路径不能为空");
    }
    Ok(())
}
