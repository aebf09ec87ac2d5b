// SPDX-License-Identifier: GPL-2.0

//! The `kernel` prelude.
//!
//! These are the most common items used by driver code.
//!
//! # Examples
//!
//! ```
//! use kernel::prelude::*;
//! ```

pub use crate::error::{Error, Result};

pub use crate::{dev_crit, dev_dbg, dev_err, dev_info, dev_warn};
pub use crate::{pr_crit, pr_debug, pr_emerg, pr_err, pr_info, pr_notice, pr_warn};
