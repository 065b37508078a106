//! Response encoding negotiation

/// Content encodings the server can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    /// zlib stream, which is what HTTP calls `deflate`
    Deflate,
    Identity,
}

impl Encoding {
    /// Value for the `Content-Encoding` header, `None` for identity
    pub fn header_value(&self) -> Option<&'static str> {
        match self {
            Encoding::Gzip => Some("gzip"),
            Encoding::Deflate => Some("deflate"),
            Encoding::Identity => None,
        }
    }

    /// Pick gzip, then deflate, from an `Accept-Encoding` header.
    ///
    /// Preference is fixed; q-values only matter when they are zero, which
    /// rules the coding out. `*` accepts gzip.
    pub fn negotiate(accept_encoding: Option<&str>) -> Self {
        let Some(header) = accept_encoding else {
            return Encoding::Identity;
        };

        let mut gzip = false;
        let mut deflate = false;
        for item in header.split(',') {
            let mut parts = item.split(';');
            let coding = parts.next().unwrap_or("").trim().to_ascii_lowercase();
            let refused = parts.any(|param| {
                let param = param.trim();
                param
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            });
            if refused {
                continue;
            }
            match coding.as_str() {
                "gzip" | "x-gzip" | "*" => gzip = true,
                "deflate" => deflate = true,
                _ => {}
            }
        }

        if gzip {
            Encoding::Gzip
        } else if deflate {
            Encoding::Deflate
        } else {
            Encoding::Identity
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_header_is_identity() {
        assert_eq!(Encoding::negotiate(None), Encoding::Identity);
        assert_eq!(Encoding::negotiate(Some("")), Encoding::Identity);
    }

    #[test]
    fn test_gzip_preferred_over_deflate() {
        assert_eq!(Encoding::negotiate(Some("deflate, gzip")), Encoding::Gzip);
        assert_eq!(Encoding::negotiate(Some("gzip, deflate, br")), Encoding::Gzip);
    }

    #[test]
    fn test_deflate_only() {
        assert_eq!(Encoding::negotiate(Some("deflate")), Encoding::Deflate);
        assert_eq!(Encoding::negotiate(Some("br, deflate;q=0.5")), Encoding::Deflate);
    }

    #[test]
    fn test_q_zero_refuses() {
        assert_eq!(
            Encoding::negotiate(Some("gzip;q=0, deflate")),
            Encoding::Deflate
        );
        assert_eq!(Encoding::negotiate(Some("gzip; q=0.0")), Encoding::Identity);
    }

    #[test]
    fn test_unsupported_only() {
        assert_eq!(Encoding::negotiate(Some("br, zstd")), Encoding::Identity);
    }

    #[test]
    fn test_case_and_wildcard() {
        assert_eq!(Encoding::negotiate(Some("GZIP")), Encoding::Gzip);
        assert_eq!(Encoding::negotiate(Some("*")), Encoding::Gzip);
    }

    #[test]
    fn test_header_values() {
        assert_eq!(Encoding::Gzip.header_value(), Some("gzip"));
        assert_eq!(Encoding::Deflate.header_value(), Some("deflate"));
        assert_eq!(Encoding::Identity.header_value(), None);
    }
}
