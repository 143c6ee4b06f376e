//! Output sinks: clipboard and user notifications.
//!
//! Both are best-effort. A transcription that cannot reach the clipboard is
//! still recorded in the result file and history, so nothing is lost.

use std::path::Path;

use log::warn;

/// Clipboard destination for finished transcriptions. Returns whether the
/// text actually landed on the clipboard.
pub trait ClipboardSink: Send + Sync {
    fn set_text(&self, text: &str) -> bool;
}

/// User-facing completion and error notices.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, body: &str, is_error: bool);
}

/// System clipboard via `arboard`. A fresh handle per call; clipboard
/// connections are cheap and holding one hostage across jobs causes
/// ownership fights on X11.
pub struct SystemClipboard;

impl ClipboardSink for SystemClipboard {
    fn set_text(&self, text: &str) -> bool {
        match arboard::Clipboard::new() {
            Ok(mut clipboard) => match clipboard.set_text(text.to_string()) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to set clipboard text: {}", e);
                    false
                }
            },
            Err(e) => {
                warn!("Failed to open clipboard: {}", e);
                false
            }
        }
    }
}

/// Fallback notifier that writes to the log. Used headless and in tests.
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, title: &str, body: &str, is_error: bool) {
        if is_error {
            warn!("[notice] {}: {}", title, body);
        } else {
            log::info!("[notice] {}: {}", title, body);
        }
    }
}

/// Native macOS notification via `osascript`. Failures are ignored;
/// notifications are decoration, not state.
#[cfg(target_os = "macos")]
pub struct OsaScriptNotifier;

#[cfg(target_os = "macos")]
impl NotificationSink for OsaScriptNotifier {
    fn notify(&self, title: &str, body: &str, _is_error: bool) {
        let script = format!(
            "display notification \"{}\" with title \"{}\"",
            escape_osascript(body),
            escape_osascript(title)
        );
        match std::process::Command::new("osascript")
            .arg("-e")
            .arg(&script)
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => log::debug!("osascript exited with {}", status),
            Err(e) => log::debug!("Failed to run osascript: {}", e),
        }
    }
}

#[cfg(target_os = "macos")]
fn escape_osascript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Default notifier for the current platform.
pub fn platform_notifier() -> Box<dyn NotificationSink> {
    #[cfg(target_os = "macos")]
    {
        Box::new(OsaScriptNotifier)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Box::new(LogNotifier)
    }
}

/// Completion notice body for a successful job.
pub fn success_message(file_count: usize) -> String {
    if file_count <= 1 {
        "Transcription complete. Copied to clipboard!".to_string()
    } else {
        format!("Transcribed {} files. Copied to clipboard!", file_count)
    }
}

/// Error notice body for a failed job.
pub fn error_message(reason: &str) -> String {
    format!("Error: {}", reason)
}

/// Notice body for a job that finished with some files failing.
pub fn partial_message(summary: &str) -> String {
    format!("Copied to clipboard, but {}", summary)
}

/// Short display name for a batch, used in notification titles.
pub fn batch_title(file_names: &[String]) -> String {
    match file_names {
        [] => "Transcription".to_string(),
        [single] => Path::new(single)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| single.clone()),
        [first, rest @ ..] => format!("{} (+{} more)", first, rest.len()),
    }
}
