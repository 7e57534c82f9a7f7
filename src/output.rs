//! Text report rendering.
//!
//! Renders sealed results in a wrk-like format. This consumes only the
//! fields of [`Results`]; it never touches live stats.

use std::fmt::Write;
use std::time::Duration;

use crate::stats::Results;

/// Renders the post-run summary.
pub fn render_text(results: &Results, print_latency: bool) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "  Thread Stats   Avg      Stdev     Max   +/- Stdev");

    if !results.latencies.is_empty() {
        let _ = writeln!(
            out,
            "    Latency   {:>8} {:>8} {:>8} {:>7.2}%",
            format_duration(results.average_latency()),
            format_duration(results.latency_std_dev()),
            format_duration(results.max_latency),
            results.latency_within_one_stdev()
        );
    }

    let rps = results.rps_stats();
    let _ = writeln!(
        out,
        "    Req/Sec   {:>8.2} {:>8.2} {:>8.2} {:>7.2}%",
        rps.avg, rps.stdev, rps.max, rps.within_one_stdev
    );

    if print_latency && !results.latencies.is_empty() {
        let _ = writeln!(out, "  Latency Distribution");
        let percentiles = results.latency_percentiles();
        for p in [50u8, 75, 90, 95, 99] {
            if let Some(latency) = percentiles.get(&p) {
                let _ = writeln!(out, "     {:>2}%   {}", p, format_duration(*latency));
            }
        }
    }

    let _ = writeln!(
        out,
        "  {} requests in {}, {} read",
        results.total_requests,
        format_duration(results.duration),
        format_bytes(results.total_read_bytes)
    );

    if results.total_errors > 0 {
        let _ = writeln!(out, "  {} errors:", results.total_errors);
        for error in results.errors.iter().take(5) {
            let _ = writeln!(out, "    {}", error);
        }
        if results.errors.len() > 5 {
            let _ = writeln!(out, "    ... and {} more", results.errors.len() - 5);
        }
    }

    if !results.status_codes.is_empty() {
        let _ = writeln!(out, "  Status code distribution:");
        let mut codes: Vec<_> = results.status_codes.iter().collect();
        codes.sort_by_key(|(code, _)| **code);
        for (code, count) in codes {
            let percentage = *count as f64 / results.total_requests.max(1) as f64 * 100.0;
            let _ = writeln!(out, "    [{}] {} responses ({:.1}%)", code, count, percentage);
        }
    }

    if results.endpoints.len() > 1 {
        let _ = writeln!(out, "  Per-endpoint:");
        let mut endpoints: Vec<_> = results.endpoints.iter().collect();
        endpoints.sort_by_key(|(url, _)| url.as_str());
        for (url, ep) in endpoints {
            let _ = writeln!(
                out,
                "    {} {} requests, {} errors, avg {}",
                url,
                ep.requests,
                ep.errors,
                format_duration(ep.average_latency())
            );
        }
    }

    let _ = writeln!(out, "Requests/sec: {:>8.2}", results.requests_per_sec());
    let _ = writeln!(
        out,
        "Transfer/sec: {:>8}",
        format_bytes(results.transfer_per_sec() as u64)
    );

    out
}

/// Prints the summary to stdout.
pub fn print_results(results: &Results, print_latency: bool) {
    print!("{}", render_text(results, print_latency));
}

fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos < 1_000 {
        format!("{:.2}ns", nanos as f64)
    } else if nanos < 1_000_000 {
        format!("{:.2}us", nanos as f64 / 1_000.0)
    } else if nanos < 1_000_000_000 {
        format!("{:.2}ms", nanos as f64 / 1_000_000.0)
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{}B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1}{}B", bytes as f64 / div as f64, b"KMGTPE"[exp] as char)
}
