//! Minimal script-free HTML pages
//!
//! Navigation between protocol steps is done with `<meta http-equiv="refresh">`
//! so the test runs in browsers without JavaScript.

use crate::output::{format_ms, format_rate};
use crate::protocol::results_url;
use crate::resolver::Summary;
use std::fmt::Write as _;

const TITLE: &str = "noscript speedtest";

/// Escape text for HTML element content and attribute values
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(title: &str, head_extra: &str, body: &str) -> String {
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{}</title>{}</head><body>{}</body></html>",
        escape_html(title),
        head_extra,
        body
    )
}

fn refresh_tag(delay_secs: u64, url: &str) -> String {
    format!(
        "<meta http-equiv=\"refresh\" content=\"{};url={}\">",
        delay_secs,
        escape_html(url)
    )
}

/// Landing page with the start form; `client_host` is carried as a hint
pub fn landing(client_host: &str) -> String {
    let body = format!(
        "<h3>{}</h3>\
         <p>Your address: {}</p>\
         <form method=\"POST\" action=\"/start\">\
         <input type=\"hidden\" name=\"ip\" value=\"{}\">\
         <button>Start test</button></form>",
        TITLE,
        escape_html(client_host),
        escape_html(client_host)
    );
    page(TITLE, "", &body)
}

/// Immediate hop to `url`, used between probes
pub fn hop(url: &str, label: &str) -> String {
    page(TITLE, &refresh_tag(0, url), &escape_html(label))
}

/// Final probe page: starts the download through a hidden frame, offers a
/// manual link and moves on to the results page after `refresh_secs`
pub fn download(download_url: &str, session_id: &str, refresh_secs: u64) -> String {
    let link = escape_html(download_url);
    let body = format!(
        "<h3>Starting download test</h3>\
         <p>If the download does not start automatically, use the link below.</p>\
         <p><a href=\"{link}\">Download test file</a></p>\
         <iframe src=\"{link}\" style=\"display:none\"></iframe>\
         <p>Results appear once the server has recorded the download.</p>",
        link = link
    );
    page("download", &refresh_tag(refresh_secs, &results_url(session_id)), &body)
}

fn row(out: &mut String, label: &str, value: &str) {
    let _ = write!(out, "<tr><td>{}</td><td>{}</td></tr>", label, escape_html(value));
}

/// Results table with the upload form
pub fn results(summary: &Summary) -> String {
    let mut body = String::from("<h3>Results</h3><table>");
    row(&mut body, "Client host", &summary.client_host);
    row(&mut body, "Ping avg", &format_ms(summary.avg_latency_ms));
    row(&mut body, "Jitter", &format_ms(summary.jitter_ms));
    row(
        &mut body,
        "Ping range",
        &format!("{} - {}", format_ms(summary.min_latency_ms), format_ms(summary.max_latency_ms)),
    );
    row(&mut body, "Samples", &summary.sample_count.to_string());
    row(&mut body, "Download", &format_rate(summary.download_rate));
    row(&mut body, "Upload", &format_rate(summary.upload_rate));
    body.push_str("</table>");

    if summary.timed_out {
        body.push_str("<p>The download was not recorded in time; reload this page to check again.</p>");
    }

    let _ = write!(
        body,
        "<hr><form method=\"POST\" action=\"/upload\" enctype=\"multipart/form-data\">\
         <input type=\"hidden\" name=\"sid\" value=\"{}\">\
         Upload a file for the upload speed test: <input type=\"file\" name=\"f\"><button>Upload</button>\
         </form><p><a href=\"/\">Run again</a></p>",
        escape_html(&summary.session_id)
    );
    page("results", "", &body)
}
