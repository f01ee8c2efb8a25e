//! Discovery file and env script publication
//!
//! After the listener has bound its port, the bridge advertises itself
//! under `<tmp>/gemini/ide/`: a JSON descriptor carrying port, workspace
//! and auth token, and a shell script exporting the same values for the
//! client's shell to source. Both files are mode 0600; the descriptor is
//! written atomically (temp file, then rename). Startup also fires a
//! best-effort reaper that removes descriptors left behind by dead
//! processes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Descriptor files older than this are removed regardless of pid state.
const STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

const DESCRIPTOR_PREFIX: &str = "gemini-ide-server-";
const ENV_MARKER: &str = "-env-";

/// Contents of the port descriptor, read by connecting clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDescriptor {
    pub port: u16,
    pub workspace_path: String,
    pub auth_token: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ide_info: Option<IdeInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeInfo {
    pub name: String,
    pub display_name: String,
}

/// Default publication directory: `<tmp>/gemini/ide/`.
pub fn default_dir() -> PathBuf {
    std::env::temp_dir().join("gemini").join("ide")
}

pub fn descriptor_file_name(pid: u32, port: u16) -> String {
    format!("{}{}-{}.json", DESCRIPTOR_PREFIX, pid, port)
}

pub fn env_file_name(editor: &str, pid: u32) -> String {
    format!("{}{}{}.sh", editor, ENV_MARKER, pid)
}

/// Manages the lifecycle of this process's discovery files.
pub struct DiscoveryPublisher {
    dir: PathBuf,
    editor: String,
    pid: u32,
    descriptor_path: Option<PathBuf>,
    env_path: Option<PathBuf>,
}

impl DiscoveryPublisher {
    pub fn new(dir: PathBuf, editor: String) -> Self {
        Self {
            dir,
            editor,
            pid: std::process::id(),
            descriptor_path: None,
            env_path: None,
        }
    }

    /// Write the descriptor and env script, then fire the stale-file
    /// reaper in the background. Reaper failure is logged, never fatal.
    pub fn publish(&mut self, port: u16, workspace: &Path, auth_token: &Uuid) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let descriptor = PortDescriptor {
            port,
            workspace_path: workspace.display().to_string(),
            auth_token: *auth_token,
            ide_info: Some(IdeInfo {
                name: self.editor.clone(),
                display_name: display_name(&self.editor),
            }),
        };
        let descriptor_path = self.dir.join(descriptor_file_name(self.pid, port));
        write_atomic(&descriptor_path, &serde_json::to_vec(&descriptor)?)?;
        self.descriptor_path = Some(descriptor_path);

        let env_path = self.dir.join(env_file_name(&self.editor, self.pid));
        write_private(&env_path, env_script(&descriptor, &self.editor).as_bytes())?;
        self.env_path = Some(env_path);

        tracing::info!(
            "Published discovery files for port {} under {}",
            port,
            self.dir.display()
        );

        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = reap_stale(&dir) {
                tracing::warn!("Stale discovery reap failed: {}", e);
            }
        });
        Ok(())
    }

    /// Remove both files. Idempotent; also runs on drop for abrupt exits.
    pub fn cleanup(&self) {
        for path in [&self.descriptor_path, &self.env_path].into_iter().flatten() {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

impl Drop for DiscoveryPublisher {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn display_name(editor: &str) -> String {
    let mut chars = editor.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The four exports sourced by the client's shell.
fn env_script(descriptor: &PortDescriptor, editor: &str) -> String {
    format!(
        "export GEMINI_CLI_IDE_SERVER_PORT='{}'\n\
         export GEMINI_CLI_IDE_WORKSPACE_PATH='{}'\n\
         export GEMINI_CLI_IDE_AUTH_TOKEN='{}'\n\
         export TERM_PROGRAM='{}'\n",
        descriptor.port, descriptor.workspace_path, descriptor.auth_token, editor
    )
}

/// Write to a temp file in the same directory, fsync, then rename over the
/// destination so readers never observe a partial descriptor.
fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_extension("json.tmp");
    write_private(&temp_path, contents)?;
    fs::rename(&temp_path, path)
}

fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Remove descriptor and env files left behind by processes that no longer
/// exist, and anything older than 24 hours. Per-file errors are swallowed;
/// a missing directory is not an error.
pub fn reap_stale(dir: &Path) -> std::io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(pid) = owning_pid(name) else {
            continue;
        };

        let expired = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .is_some_and(|age| age > STALE_AFTER);

        if expired || !is_process_alive(pid) {
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!("Reaped stale discovery file {}", name),
                Err(e) => tracing::debug!("Could not reap {}: {}", name, e),
            }
        }
    }
    Ok(())
}

/// Extract the embedded pid from `gemini-ide-server-<pid>-<port>.json` or
/// `<editor>-env-<pid>.sh`. Returns `None` for foreign files.
fn owning_pid(name: &str) -> Option<u32> {
    if let Some(rest) = name.strip_prefix(DESCRIPTOR_PREFIX) {
        return rest.split('-').next()?.parse().ok();
    }
    if let Some(idx) = name.find(ENV_MARKER) {
        let rest = &name[idx + ENV_MARKER.len()..];
        return rest.strip_suffix(".sh")?.parse().ok();
    }
    None
}

fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // Signal 0 probes existence without delivering anything.
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher(dir: &Path) -> DiscoveryPublisher {
        DiscoveryPublisher::new(dir.to_path_buf(), "neovim".to_owned())
    }

    #[tokio::test]
    async fn publish_writes_both_files_with_private_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut publisher = publisher(dir.path());
        let token = Uuid::new_v4();
        publisher.publish(4242, Path::new("/ws"), &token).unwrap();

        let pid = std::process::id();
        let descriptor_path = dir.path().join(descriptor_file_name(pid, 4242));
        let env_path = dir.path().join(env_file_name("neovim", pid));
        assert!(descriptor_path.exists());
        assert!(env_path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for path in [&descriptor_path, &env_path] {
                let mode = fs::metadata(path).unwrap().permissions().mode() & 0o777;
                assert_eq!(mode, 0o600, "{} mode", path.display());
            }
        }

        let parsed: PortDescriptor =
            serde_json::from_slice(&fs::read(&descriptor_path).unwrap()).unwrap();
        assert_eq!(parsed.port, 4242);
        assert_eq!(parsed.workspace_path, "/ws");
        assert_eq!(parsed.auth_token, token);
        assert_eq!(parsed.ide_info.unwrap().name, "neovim");
    }

    #[tokio::test]
    async fn descriptor_uses_wire_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut publisher = publisher(dir.path());
        let token = Uuid::new_v4();
        publisher.publish(5000, Path::new("/ws"), &token).unwrap();

        let path = dir
            .path()
            .join(descriptor_file_name(std::process::id(), 5000));
        let raw: serde_json::Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        assert!(raw.get("workspacePath").is_some());
        assert!(raw.get("authToken").is_some());
        assert!(raw["ideInfo"].get("displayName").is_some());
    }

    #[tokio::test]
    async fn env_script_exports_all_four_variables() {
        let dir = tempfile::tempdir().unwrap();
        let mut publisher = publisher(dir.path());
        let token = Uuid::new_v4();
        publisher.publish(4242, Path::new("/my ws"), &token).unwrap();

        let env_path = dir.path().join(env_file_name("neovim", std::process::id()));
        let script = fs::read_to_string(env_path).unwrap();
        assert_eq!(script.lines().count(), 4);
        assert!(script.contains("export GEMINI_CLI_IDE_SERVER_PORT='4242'"));
        assert!(script.contains("export GEMINI_CLI_IDE_WORKSPACE_PATH='/my ws'"));
        assert!(script.contains(&format!("export GEMINI_CLI_IDE_AUTH_TOKEN='{}'", token)));
        assert!(script.contains("export TERM_PROGRAM='neovim'"));
    }

    #[tokio::test]
    async fn cleanup_removes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut publisher = publisher(dir.path());
        let token = Uuid::new_v4();
        publisher.publish(4242, Path::new("/ws"), &token).unwrap();
        publisher.cleanup();

        let pid = std::process::id();
        assert!(!dir.path().join(descriptor_file_name(pid, 4242)).exists());
        assert!(!dir.path().join(env_file_name("neovim", pid)).exists());

        // Idempotent.
        publisher.cleanup();
    }

    #[test]
    fn reaper_removes_files_of_dead_processes() {
        let dir = tempfile::tempdir().unwrap();
        // Pid 999999 should not exist; mtime is fresh so only the liveness
        // probe can justify removal.
        let dead = dir.path().join("gemini-ide-server-999999-5000.json");
        fs::write(&dead, b"{}").unwrap();

        reap_stale(dir.path()).unwrap();
        assert!(!dead.exists());
    }

    #[test]
    fn reaper_keeps_fresh_files_of_live_processes() {
        let dir = tempfile::tempdir().unwrap();
        let pid = std::process::id();
        let descriptor = dir.path().join(descriptor_file_name(pid, 5000));
        let env = dir.path().join(env_file_name("neovim", pid));
        fs::write(&descriptor, b"{}").unwrap();
        fs::write(&env, b"").unwrap();

        reap_stale(dir.path()).unwrap();
        assert!(descriptor.exists());
        assert!(env.exists());
    }

    #[test]
    fn reaper_removes_files_older_than_a_day() {
        let dir = tempfile::tempdir().unwrap();
        let pid = std::process::id();
        let path = dir.path().join(descriptor_file_name(pid, 5000));
        fs::write(&path, b"{}").unwrap();

        let old = SystemTime::now() - Duration::from_secs(25 * 60 * 60);
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_times(fs::FileTimes::new().set_modified(old)).unwrap();

        reap_stale(dir.path()).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn reaper_ignores_foreign_files_and_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let foreign = dir.path().join("notes.txt");
        fs::write(&foreign, b"keep me").unwrap();

        reap_stale(dir.path()).unwrap();
        assert!(foreign.exists());

        reap_stale(&dir.path().join("does-not-exist")).unwrap();
    }

    #[test]
    fn pid_extraction_handles_both_shapes() {
        assert_eq!(owning_pid("gemini-ide-server-1234-5000.json"), Some(1234));
        assert_eq!(owning_pid("neovim-env-1234.sh"), Some(1234));
        assert_eq!(owning_pid("vim-env-77.sh"), Some(77));
        assert_eq!(owning_pid("random.json"), None);
        assert_eq!(owning_pid("gemini-ide-server-x-y.json"), None);
    }
}
