// SPDX-License-Identifier: GPL-2.0

//! Kernel-style errors.
//!
//! Errors are carried as negative POSIX errno values so that they can be handed back across the
//! user submission ABI unchanged. The symbolic constants live in [`code`].

use core::fmt;
use core::num::TryFromIntError;

/// Contains the C-compatible error codes.
pub mod code {
    macro_rules! declare_err {
        ($err:tt, $num:expr, $($doc:expr),+) => {
            $(
            #[doc = $doc]
            )*
            pub const $err: super::Error = super::Error(-$num);
        };
    }

    declare_err!(EPERM, 1, "Operation not permitted.");
    declare_err!(ENOENT, 2, "No such file or directory.");
    declare_err!(EINTR, 4, "Interrupted system call.");
    declare_err!(EIO, 5, "I/O error.");
    declare_err!(EAGAIN, 11, "Try again.");
    declare_err!(ENOMEM, 12, "Out of memory.");
    declare_err!(EFAULT, 14, "Bad address.");
    declare_err!(EBUSY, 16, "Device or resource busy.");
    declare_err!(EEXIST, 17, "File exists.");
    declare_err!(ENODEV, 19, "No such device.");
    declare_err!(EINVAL, 22, "Invalid argument.");
    declare_err!(ENOSPC, 28, "No space left on device.");
    declare_err!(ERANGE, 34, "Math result not representable.");
    declare_err!(ENODATA, 61, "No data available.");
    declare_err!(ECANCELED, 125, "Operation Canceled.");
    declare_err!(ETIMEDOUT, 110, "Connection timed out.");
    declare_err!(ERESTARTSYS, 512, "Restart the system call.");
}

/// Generic integer kernel error.
///
/// The kernel defines a set of integer generic error codes based on C and POSIX ones. These codes
/// may have a more specific meaning in some contexts.
///
/// # Invariants
///
/// The value is a valid `errno` (i.e. `>= -MAX_ERRNO && < 0`).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Error(i32);

impl Error {
    /// Creates an [`Error`] from a kernel error code.
    ///
    /// Anything that is not a valid negative errno is mapped to `EINVAL`.
    pub fn from_errno(errno: i32) -> Error {
        if !(-4095..0).contains(&errno) {
            crate::pr_warn!("attempted to create invalid error code {}", errno);
            return code::EINVAL;
        }

        Error(errno)
    }

    /// Returns the kernel error code.
    pub fn to_errno(self) -> i32 {
        self.0
    }

    /// Returns a string representing the error, if one exists.
    pub fn name(&self) -> Option<&'static str> {
        use code::*;

        let name = match *self {
            EPERM => "EPERM",
            ENOENT => "ENOENT",
            EINTR => "EINTR",
            EIO => "EIO",
            EAGAIN => "EAGAIN",
            ENOMEM => "ENOMEM",
            EFAULT => "EFAULT",
            EBUSY => "EBUSY",
            EEXIST => "EEXIST",
            ENODEV => "ENODEV",
            EINVAL => "EINVAL",
            ENOSPC => "ENOSPC",
            ERANGE => "ERANGE",
            ENODATA => "ENODATA",
            ECANCELED => "ECANCELED",
            ETIMEDOUT => "ETIMEDOUT",
            ERESTARTSYS => "ERESTARTSYS",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            // Print out number if no name can be found.
            None => f.debug_tuple("Error").field(&-self.0).finish(),
            Some(name) => f.write_str(name),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            None => write!(f, "error {}", -self.0),
            Some(name) => f.write_str(name),
        }
    }
}

impl std::error::Error for Error {}

impl From<TryFromIntError> for Error {
    fn from(_: TryFromIntError) -> Error {
        code::EINVAL
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Error {
        code::ENOMEM
    }
}

/// A [`Result`] with an [`Error`] error type.
///
/// To be used as the return type for functions that may fail.
pub type Result<T = ()> = core::result::Result<T, Error>;

/// Converts an integer as returned by a C-style callback into a [`Result`].
///
/// Negative values are errors, everything else is passed through.
pub fn to_result(err: i32) -> Result<i32> {
    if err < 0 {
        Err(Error::from_errno(err))
    } else {
        Ok(err)
    }
}

#[cfg(test)]
mod tests {
    use super::code::*;
    use super::*;

    #[test]
    fn errno_values() {
        assert_eq!(EINVAL.to_errno(), -22);
        assert_eq!(EAGAIN.to_errno(), -11);
        assert_eq!(Error::from_errno(-19), ENODEV);
        assert_eq!(Error::from_errno(5), EINVAL);
    }

    #[test]
    fn names() {
        assert_eq!(format!("{:?}", ETIMEDOUT), "ETIMEDOUT");
        assert_eq!(format!("{}", Error::from_errno(-4000)), "error 4000");
        assert_eq!(to_result(3), Ok(3));
        assert_eq!(to_result(-12), Err(ENOMEM));
    }
}
