//! Clip playback. Sound is an external collaborator: we hand a clip name
//! and a volume to the system player and move on. Failures are logged and
//! otherwise ignored; the layout must never stall on audio.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use log::{debug, warn};

use crate::layout::{CLIP_VOLUME, SOUND_DIR};

pub struct Player {
    dir: PathBuf,
    enabled: bool,
}

impl Player {
    pub fn new(enabled: bool) -> Player {
        Player { dir: PathBuf::from(SOUND_DIR), enabled }
    }

    pub fn play(&self, clip: &str) { self.play_at(clip, CLIP_VOLUME) }

    pub fn play_at(&self, clip: &str, volume: u8) {
        if !self.enabled {
            debug!("sound disabled, skipping {}", clip);
            return;
        }
        let path = self.dir.join(format!("{}.wav", clip));
        let vol = Command::new("amixer")
            .args(["-q", "sset", "PCM", &format!("{}%", volume.min(100))])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = vol {
            debug!("amixer not available: {}", e);
        }
        match Command::new("aplay")
            .arg("-q")
            .arg(&path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(_) => debug!("playing {} at {}%", path.display(), volume),
            Err(e) => warn!("could not play {}: {}", path.display(), e),
        }
    }
}
