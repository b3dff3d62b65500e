//! Best-effort sound playback.

use std::io::{self, Write};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundCue {
    Reminder,
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio output unavailable")]
    Unavailable,
    #[error("audio output failed: {0}")]
    Io(#[from] io::Error),
}

pub trait SoundPlayer: Send + Sync {
    fn play(&self, cue: SoundCue) -> Result<(), AudioError>;
}

/// Rings the terminal bell on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalBell;

impl SoundPlayer for TerminalBell {
    fn play(&self, _cue: SoundCue) -> Result<(), AudioError> {
        let mut stderr = io::stderr().lock();
        stderr.write_all(b"\x07")?;
        stderr.flush()?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl SoundPlayer for Silent {
    fn play(&self, _cue: SoundCue) -> Result<(), AudioError> {
        Err(AudioError::Unavailable)
    }
}
