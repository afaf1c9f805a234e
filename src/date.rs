// Copyright (c) 2017 The Rouille developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! `Date:` header formatting, IMF-fixdate per RFC 7231 §7.1.1.1
//! (`Sun, 06 Nov 1994 08:49:37 GMT`), auto-generated unless suppressed (§6).

use chrono::{DateTime, Utc};

/// Formats `when` as an IMF-fixdate string.
pub fn format_http_date(when: DateTime<Utc>) -> String {
    when.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Formats the current time. The daemon calls this once per response unless
/// `suppress_date_header` is set.
pub fn http_date_now() -> String {
    format_http_date(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_per_rfc_7231_example() {
        let when = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        assert_eq!(format_http_date(when), "Sun, 06 Nov 1994 08:49:37 GMT");
    }
}
