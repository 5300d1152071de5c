//! Pure pak validation. A pure server expects every client to report the
//! checksums of the paks it loaded; the report has to name the two game
//! module paks first and may only reference paks the server itself loaded.

/// Outcome of checking a client pak report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PureVerdict {
    /// Report predates the current checksum feed; ignore it entirely.
    Outdated,
    Pass,
    Fail,
}

fn atoi(s: &str) -> i32 {
    s.parse().unwrap_or(0)
}

/// Checks a pak report. `args` are the tokens after the command name:
/// server id, two module checksums, a `@` separator, referenced pak
/// checksums, and a final rolling checksum over the whole list.
pub fn verify_pak_report(
    args: &[String],
    checksum_feed_server_id: i32,
    module_checksums: [i32; 2],
    server_checksums: &[i32],
    checksum_feed: i32,
) -> PureVerdict {
    let report_server_id = match args.first() {
        Some(s) => atoi(s),
        None => return PureVerdict::Fail,
    };
    // a late report from before the feed changed proves nothing either way
    if report_server_id < checksum_feed_server_id {
        return PureVerdict::Outdated;
    }

    // server id, cgame, ui, separator, final checksum
    if args.len() < 5 {
        return PureVerdict::Fail;
    }

    if args[1].starts_with('@') || atoi(&args[1]) != module_checksums[0] {
        return PureVerdict::Fail;
    }
    if args[2].starts_with('@') || atoi(&args[2]) != module_checksums[1] {
        return PureVerdict::Fail;
    }
    if args[3] != "@" {
        return PureVerdict::Fail;
    }

    let trailing: Vec<i32> = args[4..].iter().map(|s| atoi(s)).collect();
    if trailing.is_empty() {
        return PureVerdict::Fail;
    }
    let (paks, final_sum) = trailing.split_at(trailing.len() - 1);

    // duplicate checksums would let a client pad the list
    for (i, a) in paks.iter().enumerate() {
        for b in &paks[i + 1..] {
            if a == b {
                return PureVerdict::Fail;
            }
        }
    }

    // every referenced pak must be one the server loaded
    for pak in paks {
        if !server_checksums.contains(pak) {
            return PureVerdict::Fail;
        }
    }

    let mut rolling = checksum_feed;
    for pak in paks {
        rolling ^= pak;
    }
    rolling ^= paks.len() as i32;
    if rolling != final_sum[0] {
        return PureVerdict::Fail;
    }

    PureVerdict::Pass
}

/// Builds the trailing rolling checksum a well-behaved client would send.
pub fn rolling_checksum(checksum_feed: i32, paks: &[i32]) -> i32 {
    let mut sum = checksum_feed;
    for pak in paks {
        sum ^= pak;
    }
    sum ^ paks.len() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: i32 = 0x1234_5678;
    const MODULES: [i32; 2] = [111, 222];

    fn server_paks() -> Vec<i32> {
        vec![111, 222, 333, 444]
    }

    fn report(paks: &[i32]) -> Vec<String> {
        let mut args = vec!["10".to_string(), "111".to_string(), "222".to_string(), "@".to_string()];
        for p in paks {
            args.push(p.to_string());
        }
        args.push(rolling_checksum(FEED, paks).to_string());
        args
    }

    #[test]
    fn valid_report_passes() {
        let args = report(&[333, 444]);
        assert_eq!(
            verify_pak_report(&args, 5, MODULES, &server_paks(), FEED),
            PureVerdict::Pass
        );
    }

    #[test]
    fn outdated_report_ignored() {
        let args = report(&[333]);
        assert_eq!(
            verify_pak_report(&args, 50, MODULES, &server_paks(), FEED),
            PureVerdict::Outdated
        );
    }

    #[test]
    fn wrong_module_checksum_fails() {
        let mut args = report(&[333]);
        args[1] = "999".to_string();
        assert_eq!(
            verify_pak_report(&args, 5, MODULES, &server_paks(), FEED),
            PureVerdict::Fail
        );
    }

    #[test]
    fn missing_separator_fails() {
        let mut args = report(&[333]);
        args[3] = "333".to_string();
        assert_eq!(
            verify_pak_report(&args, 5, MODULES, &server_paks(), FEED),
            PureVerdict::Fail
        );
    }

    #[test]
    fn duplicate_trailing_checksums_fail() {
        let mut args = vec!["10".into(), "111".into(), "222".into(), "@".into()];
        args.push("333".to_string());
        args.push("333".to_string());
        args.push(rolling_checksum(FEED, &[333, 333]).to_string());
        assert_eq!(
            verify_pak_report(&args, 5, MODULES, &server_paks(), FEED),
            PureVerdict::Fail
        );
    }

    #[test]
    fn unknown_pak_fails() {
        let args = report(&[333, 555]);
        assert_eq!(
            verify_pak_report(&args, 5, MODULES, &server_paks(), FEED),
            PureVerdict::Fail
        );
    }

    #[test]
    fn bad_rolling_checksum_fails() {
        let mut args = report(&[333, 444]);
        let last = args.len() - 1;
        args[last] = "0".to_string();
        assert_eq!(
            verify_pak_report(&args, 5, MODULES, &server_paks(), FEED),
            PureVerdict::Fail
        );
    }

    #[test]
    fn truncated_report_fails() {
        let args = vec!["10".to_string(), "111".to_string()];
        assert_eq!(
            verify_pak_report(&args, 5, MODULES, &server_paks(), FEED),
            PureVerdict::Fail
        );
    }
}
