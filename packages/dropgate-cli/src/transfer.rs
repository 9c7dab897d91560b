//! The `send` and `receive` commands.
//!
//! Both commands build a WebSocket channel (dialing or listening), hand
//! it to a core session task, and render events. Multiple send paths
//! are spooled through the streaming archive writer into a temporary
//! ZIP first, because the protocol announces the payload size up front.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

use dropgate_core::archive::ArchiveWriter;
use dropgate_core::fs::{FileSink, FileSource};
use dropgate_core::io::Source;
use dropgate_core::net::WsChannel;
use dropgate_core::transfer::{
    new_session_id, Channel, FileMeta, Receiver, Sender, TransferConfig, TransferOutcome,
    CHUNK_SIZE,
};

use crate::config::Config;
use crate::progress;

// ============================================================================
// SEND
// ============================================================================

pub async fn send(
    paths: Vec<PathBuf>,
    to: Option<String>,
    listen: Option<String>,
    chunk_size: Option<usize>,
    quiet: bool,
    config: &Config,
) -> Result<()> {
    let payload = prepare_payload(&paths).await?;
    let source = FileSource::open(&payload.path).await?;
    let meta = FileMeta {
        name: payload.name.clone(),
        size: source.len(),
        mime: payload.mime.into(),
    };

    let mut transfer_config = TransferConfig::default();
    if let Some(chunk_size) = chunk_size.or(config.chunk_size) {
        transfer_config.chunk_size = chunk_size;
    }

    let result = match (to, listen.or_else(|| config.listen.clone())) {
        (Some(url), _) => {
            let channel = WsChannel::connect(&url).await?;
            run_send(channel, source, meta, transfer_config, quiet).await
        }
        (None, Some(addr)) => {
            let listener = TcpListener::bind(&addr)
                .await
                .wrap_err_with(|| format!("binding {addr}"))?;
            eprintln!("waiting for the receiving peer on {addr}...");
            let (stream, peer) = listener.accept().await?;
            eprintln!("peer connected from {peer}");
            let channel = WsChannel::accept(stream).await?;
            run_send(channel, source, meta, transfer_config, quiet).await
        }
        (None, None) => bail!("pass --to <url> or --listen <addr>"),
    };

    if payload.temporary {
        let _ = tokio::fs::remove_file(&payload.path).await;
    }

    let outcome = result?;
    eprintln!("sent {} ({} bytes)", payload.name, outcome.bytes);
    Ok(())
}

async fn run_send<C: Channel>(
    channel: C,
    source: FileSource,
    meta: FileMeta,
    config: TransferConfig,
    quiet: bool,
) -> Result<TransferOutcome> {
    let mut sender = Sender::with_config(channel, source, meta, new_session_id(), config);
    let progress = progress::spawn(sender.subscribe(), quiet);

    let cancel = sender.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel(Some("interrupted".into()));
        }
    });

    let outcome = sender.run().await;
    let _ = progress.await;
    Ok(outcome?)
}

/// What actually goes on the wire: the file itself, or a spooled ZIP
/// when several were named.
struct Payload {
    path: PathBuf,
    name: String,
    mime: &'static str,
    temporary: bool,
}

async fn prepare_payload(paths: &[PathBuf]) -> Result<Payload> {
    for path in paths {
        if !path.is_file() {
            bail!("{} is not a regular file", path.display());
        }
    }

    if let [path] = paths {
        return Ok(Payload {
            path: path.clone(),
            name: display_name(path)?,
            mime: "application/octet-stream",
            temporary: false,
        });
    }

    // The protocol needs the total size before the first chunk, so the
    // bundle is spooled to disk rather than streamed straight out
    let spool = std::env::temp_dir().join(format!("dropgate-{}.zip", new_session_id()));
    tracing::debug!(spool = %spool.display(), files = paths.len(), "spooling bundle");
    let sink = FileSink::create(&spool).await?;
    let mut writer = ArchiveWriter::new(sink);
    for path in paths {
        writer.start_file(&display_name(path)?).await?;
        let mut file = tokio::fs::File::open(path)
            .await
            .wrap_err_with(|| format!("opening {}", path.display()))?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_chunk(&buf[..n]).await?;
        }
        writer.end_file().await?;
    }
    writer.finalize().await?;

    Ok(Payload {
        path: spool,
        name: format!(
            "dropgate-{}.zip",
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        ),
        mime: "application/zip",
        temporary: true,
    })
}

fn display_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| eyre!("{} has no file name", path.display()))
}

// ============================================================================
// RECEIVE
// ============================================================================

pub async fn receive(
    from: Option<String>,
    listen: Option<String>,
    out: Option<PathBuf>,
    resume: Option<PathBuf>,
    verify: bool,
    quiet: bool,
    config: &Config,
) -> Result<()> {
    let out_dir = match out.or_else(|| config.output_dir.clone()) {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    // A fresh download lands in a hidden partial file; a resumed one
    // continues in place
    let (sink, partial, resume_bytes) = match &resume {
        Some(path) => {
            let len = tokio::fs::metadata(path)
                .await
                .wrap_err_with(|| format!("inspecting partial file {}", path.display()))?
                .len();
            (FileSink::open_existing(path).await?, path.clone(), Some(len))
        }
        None => {
            let partial = out_dir.join(format!(".dropgate-partial-{}", new_session_id()));
            (FileSink::create(&partial).await?, partial, None)
        }
    };

    let mut transfer_config = TransferConfig::default();
    transfer_config.verify_integrity = verify;

    let result = match (from, listen.or_else(|| config.listen.clone())) {
        (Some(url), _) => {
            let channel = WsChannel::connect(&url).await?;
            run_receive(channel, sink, resume_bytes, transfer_config, quiet).await
        }
        (None, Some(addr)) => {
            let listener = TcpListener::bind(&addr)
                .await
                .wrap_err_with(|| format!("binding {addr}"))?;
            eprintln!("waiting for the sending peer on {addr}...");
            let (stream, peer) = listener.accept().await?;
            eprintln!("peer connected from {peer}");
            let channel = WsChannel::accept(stream).await?;
            run_receive(channel, sink, resume_bytes, transfer_config, quiet).await
        }
        (None, None) => bail!("pass --from <url> or --listen <addr>"),
    };

    let (outcome, meta) = match result {
        Ok(done) => done,
        Err(err) => {
            if resume.is_none() {
                eprintln!(
                    "partial file kept at {} (continue with --resume)",
                    partial.display()
                );
            }
            return Err(err);
        }
    };

    // Resumed downloads stay where the user pointed them; fresh ones
    // take the name the sender declared
    let dest = if resume.is_some() {
        partial
    } else {
        let name = meta
            .as_ref()
            .map(|meta| sanitize_name(&meta.name))
            .unwrap_or_else(|| "dropgate.out".into());
        let dest = unique_destination(&out_dir, &name);
        tokio::fs::rename(&partial, &dest)
            .await
            .wrap_err_with(|| format!("moving {} to {}", partial.display(), dest.display()))?;
        dest
    };

    eprintln!("received {} ({} bytes)", dest.display(), outcome.bytes);
    if let Some(digest) = outcome.digest {
        eprintln!("sha256 {digest}");
    }
    Ok(())
}

async fn run_receive<C: Channel>(
    channel: C,
    sink: FileSink,
    resume_bytes: Option<u64>,
    config: TransferConfig,
    quiet: bool,
) -> Result<(TransferOutcome, Option<FileMeta>)> {
    let mut receiver = Receiver::with_config(channel, sink, config);
    if let Some(bytes) = resume_bytes {
        receiver = receiver.resume_from(bytes);
    }
    let progress = progress::spawn(receiver.subscribe(), quiet);

    let cancel = receiver.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel(Some("interrupted".into()));
        }
    });

    let outcome = receiver.run().await;
    let meta = progress.await.ok().flatten();
    Ok((outcome?, meta))
}

/// Reduce a peer-supplied name to a bare file name.
fn sanitize_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| name != "." && name != "..")
        .unwrap_or_else(|| "dropgate.out".into())
}

/// First free path in `dir` for `name`, numbering collisions the way
/// browsers do.
fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
        _ => (name.to_string(), String::new()),
    };
    for n in 1u32.. {
        let candidate = dir.join(format!("{stem} ({n}){ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("ran out of file name suffixes");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name_strips_directories() {
        assert_eq!(sanitize_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_name("a/b/c.txt"), "c.txt");
        assert_eq!(sanitize_name(".."), "dropgate.out");
        assert_eq!(sanitize_name(""), "dropgate.out");
    }

    #[test]
    fn test_unique_destination_numbers_collisions() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            unique_destination(dir.path(), "a.txt"),
            dir.path().join("a.txt")
        );

        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "a.txt"),
            dir.path().join("a (1).txt")
        );

        std::fs::write(dir.path().join("a (1).txt"), b"x").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "a.txt"),
            dir.path().join("a (2).txt")
        );
    }

    #[tokio::test]
    async fn test_prepare_payload_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.bin");
        tokio::fs::write(&path, b"payload").await.unwrap();

        let payload = prepare_payload(&[path.clone()]).await.unwrap();
        assert_eq!(payload.path, path);
        assert_eq!(payload.name, "one.bin");
        assert_eq!(payload.mime, "application/octet-stream");
        assert!(!payload.temporary);
    }

    #[tokio::test]
    async fn test_prepare_payload_bundles_multiple_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        tokio::fs::write(&a, b"hello").await.unwrap();
        tokio::fs::write(&b, b"world").await.unwrap();

        let payload = prepare_payload(&[a, b]).await.unwrap();
        assert_eq!(payload.mime, "application/zip");
        assert!(payload.temporary);
        assert!(payload.name.ends_with(".zip"));

        // The spool is a real archive with both local headers in it
        let bytes = tokio::fs::read(&payload.path).await.unwrap();
        assert_eq!(&bytes[0..4], b"PK\x03\x04");
        let needle = b"a.txt";
        assert!(bytes.windows(needle.len()).any(|w| w == needle));
        let needle = b"b.txt";
        assert!(bytes.windows(needle.len()).any(|w| w == needle));

        let _ = tokio::fs::remove_file(&payload.path).await;
    }

    #[tokio::test]
    async fn test_prepare_payload_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(prepare_payload(&[dir.path().to_path_buf()]).await.is_err());
    }
}
