use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::process::{Child, Command};

use crate::error::ChatError;

/// A playable audio resource owned by exactly one narration.
#[async_trait]
pub trait AudioResource: Send {
    /// Start playback. Resolves once playback has started or failed.
    async fn play(&mut self) -> Result<(), ChatError>;

    /// Resolves when playback finishes on its own.
    async fn ended(&mut self);

    /// Free whatever the resource holds. Called exactly once.
    fn release(self: Box<Self>);
}

/// The host's audio subsystem.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn acquire(&self, audio: Vec<u8>) -> Result<Box<dyn AudioResource>, ChatError>;
}

/// Releases the wrapped resource when dropped, so every exit path of a
/// narration (completion, failure, timeout, task abort) frees it.
pub struct AudioGuard {
    resource: Option<Box<dyn AudioResource>>,
}

impl AudioGuard {
    pub fn new(resource: Box<dyn AudioResource>) -> Self {
        Self {
            resource: Some(resource),
        }
    }

    pub async fn play(&mut self) -> Result<(), ChatError> {
        match self.resource.as_mut() {
            Some(resource) => resource.play().await,
            None => Err(ChatError::PlaybackFailed("resource already released".into())),
        }
    }

    pub async fn ended(&mut self) {
        if let Some(resource) = self.resource.as_mut() {
            resource.ended().await;
        }
    }
}

impl Drop for AudioGuard {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            resource.release();
        }
    }
}

// ---------------------------------------------------------------------------
// External player process
// ---------------------------------------------------------------------------

const PLAYER_CANDIDATES: [&str; 4] = ["ffplay", "mpg123", "mpv", "paplay"];

/// Plays audio by writing it to a temp file and handing it to a command-line
/// player (ffplay, mpg123, ...).
pub struct CommandAudioOutput {
    player: PathBuf,
    args: Vec<String>,
    temp_dir: PathBuf,
    counter: AtomicU64,
}

impl CommandAudioOutput {
    pub fn new(player: impl Into<PathBuf>) -> Self {
        let player = player.into();
        let args = default_args(&player);
        Self {
            player,
            args,
            temp_dir: std::env::temp_dir(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// First known player found on `PATH`.
    pub fn detect() -> Option<Self> {
        let player = PLAYER_CANDIDATES.iter().find_map(|bin| find_on_path(bin))?;
        info!("Detected audio player: {}", player.display());
        Some(Self::new(player))
    }

    pub fn player(&self) -> &Path {
        &self.player
    }
}

fn default_args(player: &Path) -> Vec<String> {
    let name = player.file_name().and_then(|s| s.to_str()).unwrap_or("");
    let args: &[&str] = match name {
        "ffplay" => &["-nodisp", "-autoexit", "-loglevel", "quiet"],
        "mpg123" => &["-q"],
        "mpv" => &["--no-video", "--really-quiet"],
        _ => &[],
    };
    args.iter().map(|a| a.to_string()).collect()
}

pub fn find_on_path(bin: &str) -> Option<PathBuf> {
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return p.exists().then_some(p);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.is_file())
}

#[async_trait]
impl AudioOutput for CommandAudioOutput {
    async fn acquire(&self, audio: Vec<u8>) -> Result<Box<dyn AudioResource>, ChatError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self
            .temp_dir
            .join(format!("guidebot_{}_{n}.audio", std::process::id()));
        tokio::fs::write(&path, &audio)
            .await
            .map_err(|e| ChatError::PlaybackFailed(format!("failed to write {}: {e}", path.display())))?;
        debug!("Wrote {} bytes of audio to {}", audio.len(), path.display());

        Ok(Box::new(CommandPlayback {
            player: self.player.clone(),
            args: self.args.clone(),
            path,
            child: None,
        }))
    }
}

struct CommandPlayback {
    player: PathBuf,
    args: Vec<String>,
    path: PathBuf,
    child: Option<Child>,
}

#[async_trait]
impl AudioResource for CommandPlayback {
    async fn play(&mut self) -> Result<(), ChatError> {
        let child = Command::new(&self.player)
            .args(&self.args)
            .arg(&self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ChatError::PlaybackFailed(format!("failed to start {}: {e}", self.player.display()))
            })?;
        self.child = Some(child);
        Ok(())
    }

    async fn ended(&mut self) {
        if let Some(child) = self.child.as_mut() {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    warn!("Audio player exited with {status}");
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to wait for audio player: {e}"),
            }
        }
    }

    fn release(mut self: Box<Self>) {
        if let Some(mut child) = self.child.take() {
            // No-op if the player already exited.
            let _ = child.start_kill();
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {e}", self.path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("guidebot_test_{name}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn files_in(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_default_args() {
        assert_eq!(
            default_args(Path::new("/usr/bin/ffplay")),
            vec!["-nodisp", "-autoexit", "-loglevel", "quiet"]
        );
        assert_eq!(default_args(Path::new("mpg123")), vec!["-q"]);
        assert!(default_args(Path::new("aplay")).is_empty());
    }

    #[tokio::test]
    async fn test_command_playback_lifecycle() {
        let Some(player) = find_on_path("true") else {
            return;
        };
        let dir = scratch_dir("lifecycle");
        let output = CommandAudioOutput::new(player).with_temp_dir(&dir);

        let mut guard = AudioGuard::new(output.acquire(b"ID3".to_vec()).await.unwrap());
        assert_eq!(files_in(&dir), 1);

        guard.play().await.unwrap();
        guard.ended().await;
        drop(guard);

        assert_eq!(files_in(&dir), 0);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_player_fails_and_cleans_up() {
        let dir = scratch_dir("missing");
        let output = CommandAudioOutput::new("/nonexistent/player").with_temp_dir(&dir);

        let mut guard = AudioGuard::new(output.acquire(b"ID3".to_vec()).await.unwrap());
        assert!(matches!(guard.play().await, Err(ChatError::PlaybackFailed(_))));
        drop(guard);

        assert_eq!(files_in(&dir), 0);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
