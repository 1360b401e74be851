//! Credential rotation for multi-key failover.
//!
//! A session may be configured with several API keys. When the provider
//! rejects the current key with a quota or authorization error, the session
//! rotates to the next key that has not been tried since the last explicit
//! reset. Tracking attempted indices prevents an infinite rotation loop
//! when every key is exhausted.

use std::collections::HashSet;

use crate::error::AsrError;

/// Ordered credential set with attempted-index tracking.
///
/// A single-credential configuration behaves as a degenerate rotator:
/// [`CredentialRotator::rotate`] keeps returning the same credential and
/// [`CredentialRotator::has_multiple`] is false.
#[derive(Debug)]
pub struct CredentialRotator {
    credentials: Vec<String>,
    current_index: usize,
    attempted: HashSet<usize>,
}

impl CredentialRotator {
    pub fn new(credentials: Vec<String>) -> Self {
        Self {
            credentials,
            current_index: 0,
            attempted: HashSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// The credential at the current index, clamping back to the first
    /// entry if the index somehow fell out of range.
    pub fn current(&mut self) -> Option<&str> {
        if self.credentials.is_empty() {
            return None;
        }
        if self.current_index >= self.credentials.len() {
            self.current_index = 0;
        }
        Some(&self.credentials[self.current_index])
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Mark the current credential attempted and advance circularly to the
    /// first index not yet attempted since the last reset.
    ///
    /// With a single credential this is a no-op returning that credential.
    /// Fails with [`AsrError::CredentialsExhausted`] once every index has
    /// been attempted.
    pub fn rotate(&mut self) -> Result<&str, AsrError> {
        if self.credentials.is_empty() {
            return Err(AsrError::CredentialsExhausted);
        }
        if self.credentials.len() == 1 {
            return Ok(&self.credentials[0]);
        }

        self.attempted.insert(self.current_index);

        for step in 0..self.credentials.len() {
            let candidate = (self.current_index + 1 + step) % self.credentials.len();
            if !self.attempted.contains(&candidate) {
                self.current_index = candidate;
                return Ok(&self.credentials[candidate]);
            }
        }

        Err(AsrError::CredentialsExhausted)
    }

    pub fn has_multiple(&self) -> bool {
        self.credentials.len() > 1
    }

    /// True while at least one credential has not been attempted since the
    /// last reset. Always false for single-credential sets, matching the
    /// degenerate-rotator behavior.
    pub fn has_unattempted(&self) -> bool {
        self.credentials.len() > 1 && self.attempted.len() < self.credentials.len()
    }

    /// Clear attempted history and return to the first credential.
    ///
    /// Deliberate only (operator-triggered). Never called automatically on
    /// reconnect, since that would mask an exhausted credential set.
    pub fn reset_rotation(&mut self) {
        self.current_index = 0;
        self.attempted.clear();
    }
}
