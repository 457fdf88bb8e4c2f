// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Spooling forward-only streams through a temporary file.
//!
//! Uploaders need seek support while downloaders only guarantee a
//! forward-readable stream, so every binary is first copied to disk. The
//! spool file is owned by a [`SpooledBinary`] and removed when it drops, on
//! every exit path.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::Context as _;
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt, ReadBuf};

/// Prefix of spool file names, for diagnostics.
pub const SPOOL_PREFIX: &str = "mz-migrate-binary";

/// A seekable handle on spooled binary content. Deletes the backing file on
/// drop.
#[derive(Debug)]
pub struct SpooledBinary {
    file: File,
    path: TempPath,
}

impl SpooledBinary {
    /// The location of the backing file, for diagnostics.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsyncRead for SpooledBinary {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

impl AsyncSeek for SpooledBinary {
    fn start_seek(mut self: Pin<&mut Self>, position: io::SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.file).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.file).poll_complete(cx)
    }
}

/// Copies `reader` to a fresh temporary file and returns a seekable handle
/// positioned at the start. The file lives in `dir`, or the system temporary
/// directory if `dir` is `None`.
pub async fn spool_to_temp_file<R>(dir: Option<&Path>, mut reader: R) -> anyhow::Result<SpooledBinary>
where
    R: AsyncRead + Unpin,
{
    let mut builder = tempfile::Builder::new();
    builder.prefix(SPOOL_PREFIX);
    let temp = match dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .context("cannot create spool file")?;

    let (file, path) = temp.into_parts();
    let mut file = File::from_std(file);
    tokio::io::copy(&mut reader, &mut file)
        .await
        .context("cannot spool binary to disk")?;
    file.rewind().await.context("cannot rewind spool file")?;

    Ok(SpooledBinary { file, path })
}
