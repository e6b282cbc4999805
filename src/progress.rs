use crate::error::Result;
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar over shard files, styled like the other pipeline stages.
pub fn shard_progress(len: u64, what: &str) -> Result<ProgressBar> {
    let progress = ProgressBar::new(len);
    progress.set_style(ProgressStyle::with_template(&format!(
        "[{{elapsed_precise}}] {{bar:50.cyan/blue}} {{pos:>7}}/{{len:7}} {what} | {{msg}}"
    ))?);
    Ok(progress)
}
