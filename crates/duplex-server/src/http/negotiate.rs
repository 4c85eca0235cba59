//! `Accept` header negotiation.

use axum::http::HeaderValue;

/// One entry of an `Accept` header.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaRange {
    /// Lower-cased `type/subtype`, possibly with `*` wildcards.
    pub essence: String,
    /// Quality weight in `0.0..=1.0`.
    pub q: f32,
}

impl MediaRange {
    fn covers(&self, media_type: &str) -> bool {
        if self.essence == "*/*" {
            return true;
        }
        match self.essence.strip_suffix("/*") {
            Some(prefix) => media_type
                .split_once('/')
                .is_some_and(|(kind, _)| kind == prefix),
            None => self.essence == media_type,
        }
    }

    fn specificity(&self) -> u8 {
        if self.essence == "*/*" {
            0
        } else if self.essence.ends_with("/*") {
            1
        } else {
            2
        }
    }
}

/// Parse an `Accept` header. Malformed entries are skipped.
pub fn parse_accept(header: &str) -> Vec<MediaRange> {
    header
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let essence = parts.next()?.trim().to_ascii_lowercase();
            if !essence.contains('/') {
                return None;
            }
            let mut q = 1.0_f32;
            for param in parts {
                if let Some((key, value)) = param.split_once('=') {
                    if key.trim().eq_ignore_ascii_case("q") {
                        q = value.trim().parse().ok().filter(|q: &f32| (0.0..=1.0).contains(q))?;
                    }
                }
            }
            Some(MediaRange { essence, q })
        })
        .collect()
}

/// Join every `Accept` field line into one list, as if sent as one header.
///
/// Values that are not visible ASCII are skipped. `None` when no usable
/// value remains.
pub fn join_accept<'a>(values: impl IntoIterator<Item = &'a HeaderValue>) -> Option<String> {
    let joined = values
        .into_iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    (!joined.is_empty()).then_some(joined)
}

/// Pick the supported type the client prefers.
///
/// Each supported type gets the q of the most specific range covering it.
/// Ties keep `supported` order; an explicit type beats one only reached by
/// a wildcard. Returns `None` when nothing acceptable is supported, or when
/// the header only carries `*/*`, leaving the choice to the caller.
pub fn negotiate<'a>(accept: Option<&str>, supported: &[&'a str]) -> Option<&'a str> {
    let ranges = parse_accept(accept?);
    if ranges.iter().all(|r| r.essence == "*/*") {
        return None;
    }

    let mut best: Option<(&'a str, f32, u8)> = None;
    for &candidate in supported {
        let Some(range) = ranges
            .iter()
            .filter(|r| r.covers(candidate))
            .max_by_key(|r| r.specificity())
        else {
            continue;
        };
        if range.q <= 0.0 {
            continue;
        }
        let better = match best {
            None => true,
            Some((_, q, spec)) => {
                range.q > q || ((range.q - q).abs() < f32::EPSILON && range.specificity() > spec)
            }
        };
        if better {
            best = Some((candidate, range.q, range.specificity()));
        }
    }
    best.map(|(media_type, _, _)| media_type)
}
