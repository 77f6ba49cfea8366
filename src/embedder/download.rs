/// Model file auto-download from HuggingFace.
///
/// Downloads the ONNX export and tokenizer of all-MiniLM-L6-v2 if they don't
/// already exist locally.
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// Base URL for HuggingFace model files.
const HF_BASE: &str = "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main";

/// Files required for the embedder, with their relative URL paths.
const MODEL_FILES: &[(&str, &str)] = &[
    ("model.onnx", "onnx/model.onnx"),
    ("tokenizer.json", "tokenizer.json"),
    ("config.json", "config.json"),
    ("special_tokens_map.json", "special_tokens_map.json"),
    ("tokenizer_config.json", "tokenizer_config.json"),
];

/// Return the default model directory path.
#[must_use]
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("models/all-MiniLM-L6-v2")
}

/// Check whether all required model files exist in `model_dir`.
#[must_use]
pub fn all_files_present(model_dir: &Path) -> bool {
    MODEL_FILES
        .iter()
        .all(|(name, _)| model_dir.join(name).exists())
}

/// Download model files from HuggingFace if any are missing.
///
/// Creates the model directory if it doesn't exist.
/// Skips individual files that are already present.
pub fn download_model_files(model_dir: &Path) -> Result<()> {
    info!("Checking model files in {}", model_dir.display());

    fs::create_dir_all(model_dir)
        .with_context(|| format!("failed to create models directory: {}", model_dir.display()))?;

    if all_files_present(model_dir) {
        info!("All model files found, skipping download");
        return Ok(());
    }

    info!("Downloading model files from HuggingFace (one-time, ~90MB)...");

    for &(filename, url_path) in MODEL_FILES {
        let dest = model_dir.join(filename);

        if dest.exists() {
            info!("File already exists: {filename}");
            continue;
        }

        let url = format!("{HF_BASE}/{url_path}");
        info!("Downloading {filename}...");
        download_file(&dest, &url).with_context(|| format!("failed to download {filename}"))?;
    }

    info!("Model download complete");
    Ok(())
}

/// Download a single file with a progress bar.
///
/// The body is written to a `.part` file and renamed once complete, so an
/// interrupted download is never mistaken for a present file.
fn download_file(dest: &Path, url: &str) -> Result<()> {
    let mut resp =
        reqwest::blocking::get(url).with_context(|| format!("HTTP request failed: {url}"))?;

    if !resp.status().is_success() {
        anyhow::bail!("bad status: {} for {url}", resp.status());
    }

    let total = resp.content_length().unwrap_or(0);

    let pb = if total > 0 {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {bar:40.cyan/blue} {percent}% ({bytes}/{total_bytes}) {msg}")
                .context("invalid progress template")?
                .progress_chars("█▓░"),
        );
        pb
    } else {
        ProgressBar::new_spinner()
    };

    let partial = dest.with_extension("part");
    let file = fs::File::create(&partial)
        .with_context(|| format!("failed to create file: {}", partial.display()))?;

    let mut writer = pb.wrap_write(io::BufWriter::new(file));
    let written = io::copy(&mut resp, &mut writer).context("failed to write file")?;
    writer.flush().context("failed to flush file")?;
    drop(writer);
    pb.finish_and_clear();

    info!("Downloaded {written} bytes from {url}");

    fs::rename(&partial, dest)
        .with_context(|| format!("failed to move download into {}", dest.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_all_files_present_empty_dir() {
        let dir = tempdir().unwrap();
        assert!(!all_files_present(dir.path()));
    }

    #[test]
    fn test_all_files_present_complete() {
        let dir = tempdir().unwrap();
        for &(name, _) in MODEL_FILES {
            fs::write(dir.path().join(name), "dummy").unwrap();
        }

        assert!(all_files_present(dir.path()));
        // Nothing to fetch, so no network access happens.
        assert!(download_model_files(dir.path()).is_ok());
    }

    #[test]
    fn test_all_files_present_partial() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("tokenizer.json"), "dummy").unwrap();

        assert!(!all_files_present(dir.path()));
    }

    /// Serve `body` at `/file` from a background runtime; blocking reqwest
    /// must not run on a tokio worker, so the test thread stays plain.
    fn serve_body(body: &'static [u8]) -> String {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async move {
                let app = axum::Router::new()
                    .route("/file", axum::routing::get(move || async move { body }));
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                tx.send(listener.local_addr().unwrap()).unwrap();
                axum::serve(listener, app).await.unwrap();
            });
        });
        format!("http://{}", rx.recv().unwrap())
    }

    #[test]
    fn test_download_file_streams_to_disk() {
        static BODY: [u8; 256 * 1024] = [7u8; 256 * 1024];
        let base = serve_body(&BODY);
        let dir = tempdir().unwrap();
        let dest = dir.path().join("model.onnx");

        download_file(&dest, &format!("{base}/file")).unwrap();

        let written = fs::read(&dest).unwrap();
        assert_eq!(written.len(), BODY.len());
        assert!(written.iter().all(|&b| b == 7));
        assert!(!dest.with_extension("part").exists());
    }

    #[test]
    fn test_download_file_bad_status_leaves_nothing() {
        let base = serve_body(b"ok");
        let dir = tempdir().unwrap();
        let dest = dir.path().join("tokenizer.json");

        assert!(download_file(&dest, &format!("{base}/missing")).is_err());
        assert!(!dest.exists());
        assert!(!dest.with_extension("part").exists());
    }

    #[test]
    fn test_default_model_dir() {
        let dir = default_model_dir();
        assert!(dir.to_str().unwrap().contains("all-MiniLM-L6-v2"));
    }
}
