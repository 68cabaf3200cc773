// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
/// An internal consistency check failed (e.g. tool-call pairing broke).
/// Unlike every other error in the system this one aborts the process:
/// continuing with a corrupt transcript would poison every later request.
#[derive(Debug, thiserror::Error)]
#[error("invariant violation: {0}")]
pub struct InvariantViolation(pub String);
