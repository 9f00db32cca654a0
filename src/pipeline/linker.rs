//! Dynamic linker
//!
//! The source only exposes its outputs once it has inspected the content.
//! Each new connection point is classified by media type and linked to the
//! entry queue of the matching branch, at most once per branch.

use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info, warn};

use super::engine::{ConnectionPoint, Node, Pipeline};
use super::types::MediaKind;

/// Result of handling one connection point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked(MediaKind),
    /// The branch already has an input; nothing was attempted
    AlreadyLinked(MediaKind),
    /// Not raw audio or video, or no media type yet
    Ignored,
    /// The link attempt failed; the branch stays free
    Failed(MediaKind),
}

struct BranchSlot<N> {
    entry: N,
    /// Name of the connection point currently feeding the branch
    linked: Mutex<Option<String>>,
}

pub struct DynamicLinker<N: Node> {
    audio: BranchSlot<N>,
    video: BranchSlot<N>,
}

impl<N: Node> DynamicLinker<N> {
    /// Linker feeding the given branch entry nodes
    pub fn new(audio_entry: N, video_entry: N) -> Self {
        let slot = |entry| BranchSlot {
            entry,
            linked: Mutex::new(None),
        };
        Self {
            audio: slot(audio_entry),
            video: slot(video_entry),
        }
    }

    /// Register the linker on `source`'s pad-added and pad-removed hooks
    pub fn attach<P: Pipeline<Node = N>>(self: &Arc<Self>, pipeline: &P, source: &N) {
        let linker = Arc::clone(self);
        pipeline.connect_pad_added(
            source,
            Box::new(move |pad| {
                linker.on_pad_added(pad);
            }),
        );
        let linker = Arc::clone(self);
        pipeline.connect_pad_removed(source, Box::new(move |pad| linker.on_pad_removed(pad)));
        debug!("DynamicLinker: attached to {}", source.name());
    }

    fn slot(&self, kind: MediaKind) -> &BranchSlot<N> {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    /// Handle a new connection point
    ///
    /// The point is consumed: whatever the outcome, its references are
    /// released when this returns.
    pub fn on_pad_added<P: ConnectionPoint<Node = N>>(&self, pad: P) -> LinkOutcome {
        let pad_name = pad.name();
        info!("DynamicLinker: received new pad '{}'", pad_name);

        let Some(media_type) = pad.media_type() else {
            info!("DynamicLinker: pad '{}' has no media type yet, ignoring", pad_name);
            return LinkOutcome::Ignored;
        };
        let Some(kind) = MediaKind::from_media_type(&media_type) else {
            info!(
                "DynamicLinker: pad '{}' has type '{}' which is not raw audio or video, ignoring",
                pad_name, media_type
            );
            return LinkOutcome::Ignored;
        };

        let slot = self.slot(kind);
        // Held across the attempt so concurrent pads of one kind link at most once
        let mut linked = slot.linked.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = linked.as_deref() {
            warn!(
                "DynamicLinker: {} branch already linked to '{}', ignoring '{}'",
                kind, current, pad_name
            );
            return LinkOutcome::AlreadyLinked(kind);
        }

        match pad.link_to(&slot.entry) {
            Ok(()) => {
                info!("DynamicLinker: link succeeded (type '{}')", media_type);
                *linked = Some(pad_name);
                LinkOutcome::Linked(kind)
            }
            Err(e) => {
                error!("DynamicLinker: type is '{}' but link failed: {}", media_type, e);
                LinkOutcome::Failed(kind)
            }
        }
    }

    /// Free the branch fed by a connection point that went away
    pub fn on_pad_removed<P: ConnectionPoint<Node = N>>(&self, pad: P) {
        let pad_name = pad.name();
        for kind in [MediaKind::Audio, MediaKind::Video] {
            let mut linked = self
                .slot(kind)
                .linked
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if linked.as_deref() == Some(pad_name.as_str()) {
                *linked = None;
                debug!("DynamicLinker: pad '{}' removed, {} branch is free", pad_name, kind);
            }
        }
    }

    pub fn is_linked(&self, kind: MediaKind) -> bool {
        self.slot(kind)
            .linked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
