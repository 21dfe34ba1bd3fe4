//! Incoming thumbnail/cover-art requests.

use std::path::PathBuf;

/// Upper bound on either axis of a requested size, after clamping.
pub const MAX_SIZE: u32 = 1920;

/// A `(width, height)` pair as carried on the wire. `0` on either axis means
/// "unbounded on that axis"; `(0, 0)` means "original size after orientation
/// fix" — not "server chooses".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The sentinel meaning "original dimensions, after orientation fix".
    #[must_use]
    pub fn original() -> Self {
        Self::new(0, 0)
    }

    #[must_use]
    pub fn is_original(self) -> bool {
        self.width == 0 && self.height == 0
    }

    /// Clamps both axes into `[0, MAX_SIZE]`. Does not know about the
    /// original image's dimensions yet — that resolution happens in
    /// [`TargetSize::resolve_against`].
    #[must_use]
    pub fn clamp_to_max(self) -> Self {
        Self::new(self.width.min(MAX_SIZE), self.height.min(MAX_SIZE))
    }

    /// Resolves a `0` axis against the original image dimensions, preserving
    /// aspect ratio, and never upscaling beyond `(orig_w, orig_h)`.
    #[must_use]
    pub fn resolve_against(self, orig_w: u32, orig_h: u32) -> (u32, u32) {
        let clamped = self.clamp_to_max();
        if clamped.is_original() {
            return (orig_w, orig_h);
        }

        let (w, h) = match (clamped.width, clamped.height) {
            (0, h) => {
                let w = if orig_h == 0 {
                    0
                } else {
                    (u64::from(h) * u64::from(orig_w) / u64::from(orig_h)) as u32
                };
                (w, h)
            }
            (w, 0) => {
                let h = if orig_w == 0 {
                    0
                } else {
                    (u64::from(w) * u64::from(orig_h) / u64::from(orig_w)) as u32
                };
                (w, h)
            }
            (w, h) => {
                // Both bounded: keep aspect ratio within the box, never upscale.
                let scale = f64::min(
                    f64::from(w) / f64::from(orig_w.max(1)),
                    f64::from(h) / f64::from(orig_h.max(1)),
                );
                let scale = scale.min(1.0);
                (
                    ((f64::from(orig_w) * scale).round() as u32).max(1),
                    ((f64::from(orig_h) * scale).round() as u32).max(1),
                )
            }
        };

        (w.min(orig_w).max(1), h.min(orig_h).max(1))
    }
}

/// Which kind of remote art endpoint a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtKind {
    Album,
    Artist,
}

impl ArtKind {
    /// Fixed per-kind size requested from the remote endpoint (§4.4).
    #[must_use]
    pub fn remote_size(self) -> u32 {
        match self {
            ArtKind::Album => 350,
            ArtKind::Artist => 300,
        }
    }
}

/// A single incoming request, as named by the IPC surface in §6.
#[derive(Debug, Clone)]
pub enum ThumbnailRequest {
    Thumbnail {
        path: PathBuf,
        size: TargetSize,
    },
    Art {
        kind: ArtKind,
        artist: String,
        album: String,
        size: TargetSize,
    },
}

impl ThumbnailRequest {
    #[must_use]
    pub fn size(&self) -> TargetSize {
        match self {
            ThumbnailRequest::Thumbnail { size, .. } | ThumbnailRequest::Art { size, .. } => *size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn original_is_zero_zero() {
        assert!(TargetSize::original().is_original());
        assert!(!TargetSize::new(1, 0).is_original());
    }

    #[test]
    fn resolve_original_keeps_source_size() {
        let (w, h) = TargetSize::original().resolve_against(640, 480);
        assert_eq!((w, h), (640, 480));
    }

    #[test]
    fn resolve_zero_height_preserves_aspect() {
        let (w, h) = TargetSize::new(48, 0).resolve_against(640, 480);
        assert_eq!((w, h), (48, 36));
    }

    #[test]
    fn resolve_clamps_without_upscaling() {
        let (w, h) = TargetSize::new(320, 240).resolve_against(100, 80);
        assert_eq!((w, h), (100, 80));
    }

    #[test]
    fn resolve_box_preserves_aspect() {
        let (w, h) = TargetSize::new(48, 48).resolve_against(640, 480);
        assert_eq!((w, h), (48, 36));
    }

    #[test]
    fn clamp_to_max_caps_oversized_axes() {
        let size = TargetSize::new(5000, 10).clamp_to_max();
        assert_eq!(size.width, MAX_SIZE);
    }
}
