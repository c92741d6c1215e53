use serde::Serialize;
use shared::{
    domain::{CaptureShot, KioskPhase, SessionId, SessionOptions, TransactionId, SHOTS_PER_STRIP},
    error::{KioskError, KioskResult},
};

/// The per-visitor record. Only the controller mutates it; screens read
/// [`SessionView`] snapshots.
#[derive(Debug, Clone)]
pub struct SessionState {
    session_id: Option<SessionId>,
    transaction_id: Option<TransactionId>,
    options: SessionOptions,
    photos: Vec<String>,
    copies: u32,
    retake_count: u32,
    strip_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub phase: KioskPhase,
    pub session_id: Option<SessionId>,
    pub transaction_id: Option<TransactionId>,
    pub options: SessionOptions,
    pub photos: Vec<String>,
    pub copies: u32,
    pub retake_count: u32,
    pub retake_available: bool,
    pub payment_failure_count: u32,
    pub strip_path: Option<String>,
}

pub const MAX_RETAKES: u32 = 1;

impl SessionState {
    pub fn new(copies: u32) -> Self {
        Self {
            session_id: None,
            transaction_id: None,
            options: SessionOptions::default(),
            photos: Vec::with_capacity(SHOTS_PER_STRIP),
            copies: copies.max(1),
            retake_count: 0,
            strip_path: None,
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn photos(&self) -> &[String] {
        &self.photos
    }

    pub fn shot_index(&self) -> usize {
        self.photos.len()
    }

    pub fn is_strip_complete(&self) -> bool {
        self.photos.len() >= SHOTS_PER_STRIP
    }

    pub fn copies(&self) -> u32 {
        self.copies
    }

    pub fn retake_count(&self) -> u32 {
        self.retake_count
    }

    pub fn retake_available(&self) -> bool {
        self.retake_count < MAX_RETAKES
    }

    pub fn strip_path(&self) -> Option<&str> {
        self.strip_path.as_deref()
    }

    pub(crate) fn begin(&mut self, session_id: SessionId) {
        self.session_id = Some(session_id);
        self.transaction_id = None;
        self.options = SessionOptions::default();
        self.photos.clear();
        self.retake_count = 0;
        self.strip_path = None;
    }

    pub(crate) fn mark_paid(
        &mut self,
        transaction_id: Option<TransactionId>,
        copies: Option<u32>,
        session_id: Option<SessionId>,
    ) {
        self.transaction_id = transaction_id;
        if let Some(copies) = copies.filter(|copies| *copies > 0) {
            self.copies = copies;
        }
        if let Some(session_id) = session_id {
            self.session_id = Some(session_id);
        }
    }

    pub(crate) fn set_copies(&mut self, copies: u32) {
        self.copies = copies;
    }

    pub(crate) fn set_options(&mut self, options: SessionOptions) {
        self.options = options;
    }

    pub(crate) fn append_photo(&mut self, path: String) -> KioskResult<CaptureShot> {
        if self.is_strip_complete() {
            return Err(KioskError::CaptureFailed(format!(
                "strip already holds {SHOTS_PER_STRIP} photos"
            )));
        }
        let shot = CaptureShot {
            index: self.photos.len(),
            path: path.clone(),
        };
        self.photos.push(path);
        Ok(shot)
    }

    pub(crate) fn set_strip_path(&mut self, path: String) {
        self.strip_path = Some(path);
    }

    /// Fresh device session for a retake; payment and copies carry over.
    pub(crate) fn restart_for_retake(&mut self, session_id: SessionId) {
        self.session_id = Some(session_id);
        self.options = SessionOptions::default();
        self.photos.clear();
        self.strip_path = None;
        self.retake_count = (self.retake_count + 1).min(MAX_RETAKES);
    }

    /// Drops everything tied to the visitor. The kiosk-level copy default stays.
    pub(crate) fn clear(&mut self) {
        self.session_id = None;
        self.transaction_id = None;
        self.options = SessionOptions::default();
        self.photos.clear();
        self.retake_count = 0;
        self.strip_path = None;
    }

    pub fn view(&self, phase: KioskPhase, payment_failure_count: u32) -> SessionView {
        SessionView {
            phase,
            session_id: self.session_id.clone(),
            transaction_id: self.transaction_id.clone(),
            options: self.options.clone(),
            photos: self.photos.clone(),
            copies: self.copies,
            retake_count: self.retake_count,
            retake_available: self.retake_available(),
            payment_failure_count,
            strip_path: self.strip_path.clone(),
        }
    }
}
