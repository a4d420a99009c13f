// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Handshake response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    Ok = 0,
    BadMagic = 1,
    BadVersion = 2,
    TokenExpired = 3,
    TokenUnknown = 4,
    Full = 5,
    BadRequest = 6,
    Internal = 7,
}

impl TryFrom<u16> for Status {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::Ok),
            1 => Ok(Status::BadMagic),
            2 => Ok(Status::BadVersion),
            3 => Ok(Status::TokenExpired),
            4 => Ok(Status::TokenUnknown),
            5 => Ok(Status::Full),
            6 => Ok(Status::BadRequest),
            7 => Ok(Status::Internal),
            _ => Err(()),
        }
    }
}

impl Status {
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}
