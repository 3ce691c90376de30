use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::transport::Transport;

const CHUNK_SIZE: usize = 1024;

/// Download `url` to `dest`, creating or truncating it. The body is copied in
/// fixed-size chunks rather than buffered whole; the archive runs to a few
/// megabytes and there is no reason to hold it in memory.
pub fn download(transport: &dyn Transport, url: &str, dest: &Path) -> Result<()> {
    let mut body = transport.fetch(url)?;
    let mut out = File::create(dest)?;
    let mut buf = [0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = body.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        total += n as u64;
    }
    info!(bytes = total, dest = %dest.display(), "downloaded");
    Ok(())
}
