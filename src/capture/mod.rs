//! Capture strategy selection.
//!
//! Each graphics library exposes its final frame differently: a figure save,
//! a display-surface dump or a canvas export. The library is decided once per
//! job, from concept metadata when available and from the code text otherwise,
//! and [`strategy::rewrite`] injects the matching save hook.

pub mod strategy;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub use strategy::rewrite;

/// Teardown call of the game-loop idiom; the save hook goes right before it.
pub(crate) const GAME_TEARDOWN: &str = "pygame.quit(";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum GraphicsLibrary {
    /// matplotlib figures
    Plotting,
    /// pygame display loops
    GameLoop,
    /// turtle canvas drawings
    TurtleGraphics,
    /// Anything else; a plotting save is attempted
    #[default]
    Unknown,
}

impl GraphicsLibrary {
    /// Infer the library from the code text. First match wins.
    pub fn detect(code: &str) -> Self {
        if code.contains("matplotlib") || code.contains("plt.") {
            Self::Plotting
        } else if code.contains("pygame") && code.contains(GAME_TEARDOWN) {
            Self::GameLoop
        } else if code.contains("turtle") {
            Self::TurtleGraphics
        } else {
            Self::Unknown
        }
    }

    /// Map a concept's `library` field (`matplotlib`, `pygame`, `turtle`).
    pub fn from_hint(hint: &str) -> Self {
        match hint.trim().to_ascii_lowercase().as_str() {
            "matplotlib" | "plotting" | "plt" => Self::Plotting,
            "pygame" | "game_loop" | "gameloop" => Self::GameLoop,
            "turtle" | "turtle_graphics" => Self::TurtleGraphics,
            _ => Self::Unknown,
        }
    }

    /// Metadata when present and recognised, text inference otherwise.
    pub fn resolve(hint: Option<&str>, code: &str) -> Self {
        match hint.map(Self::from_hint) {
            Some(library) if library != Self::Unknown => library,
            _ => Self::detect(code),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plotting => "plotting",
            Self::GameLoop => "game_loop",
            Self::TurtleGraphics => "turtle_graphics",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GraphicsLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect the library and rewrite `code` so it saves its final frame to
/// `artifact_path`.
pub fn prepare_for_capture(code: &str, artifact_path: &Path, budget: Duration) -> String {
    rewrite(GraphicsLibrary::detect(code), code, artifact_path, budget)
}
