// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error taxonomy (spec §7). All of these map onto a request's error field;
//! `WireError` carries the protocol-specific secondary code some of them
//! also set.

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("open failed: {0}")]
    OpenFailure(OpenFailureReason),
    #[error("command requires the unit to be online")]
    OutOfService,
    #[error("resource exhaustion")]
    NoResources,
    #[error("bad argument")]
    BadArgument,
    #[error("command or event not supported")]
    NotSupported,
    #[error("request aborted")]
    Aborted,
    #[error("operation timed out")]
    Timeout,
    #[error("internal software error")]
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailureReason {
    BadUnit,
    BadRequestLength,
    ExclusivityDenied,
    ResourceExhaustion,
}

impl std::fmt::Display for OpenFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OpenFailureReason::BadUnit => "unit number other than 0",
            OpenFailureReason::BadRequestLength => "request too short",
            OpenFailureReason::ExclusivityDenied => "unit already opened exclusively",
            OpenFailureReason::ResourceExhaustion => "no memory for session state",
        };
        f.write_str(s)
    }
}

/// Secondary, protocol-specific code carried alongside `DriverError` on a
/// request (spec §4.13, §7). Not every error sets one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    UnitOffline,
    BuffError,
    BadEvent,
    NoCmd,
}

pub type DriverResult<T> = Result<T, DriverError>;
