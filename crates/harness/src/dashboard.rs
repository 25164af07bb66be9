//! Static dashboard page
//!
//! Renders a self-contained HTML page from a batch summary. The page embeds
//! the summary as JSON and subscribes to the push channel for live logs.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use testdeck_common::{BatchSummary, Result, SuiteStatus};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__(GENERATED|TABLE|WS_URL|SUMMARY_JSON)__").expect("invalid placeholder regex"));

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Testdeck</title>
<style>
  body { font-family: system-ui, sans-serif; margin: 2rem; background: #0f1115; color: #e6e6e6; }
  table { border-collapse: collapse; width: 100%; margin-bottom: 2rem; }
  th, td { padding: .4rem .8rem; border-bottom: 1px solid #2a2d35; text-align: left; }
  .passed { color: #3fb950; } .failed { color: #f85149; } .error { color: #d29922; }
  .totals { font-weight: 600; }
  #status { font-size: .9rem; color: #8b949e; }
  #log { background: #161b22; padding: 1rem; height: 24rem; overflow-y: auto; font-family: monospace; font-size: .85rem; }
  #log .error { color: #f85149; } #log .success { color: #3fb950; } #log .warning { color: #d29922; }
</style>
</head>
<body>
<h1>Test results</h1>
<p id="generated">__GENERATED__</p>
__TABLE__
<h2>Live output <span id="status">connecting</span></h2>
<div id="log"></div>
<script id="summary" type="application/json">__SUMMARY_JSON__</script>
<script>
(function () {
  var summary = JSON.parse(document.getElementById('summary').textContent || 'null');
  var log = document.getElementById('log');
  var status = document.getElementById('status');
  function append(level, text) {
    var line = document.createElement('div');
    line.className = level;
    line.textContent = text;
    log.appendChild(line);
    log.scrollTop = log.scrollHeight;
  }
  function connect() {
    var ws = new WebSocket(__WS_URL__);
    ws.onopen = function () { status.textContent = 'connected'; };
    ws.onclose = function () { status.textContent = 'disconnected'; setTimeout(connect, 3000); };
    ws.onmessage = function (event) {
      var msg = JSON.parse(event.data);
      if (msg.type === 'log') {
        append(msg.data.level, msg.data.message);
      } else if (msg.type === 'state') {
        status.textContent = msg.data.status;
      } else if (msg.type === 'end') {
        status.textContent = msg.data.status + ' (' + msg.data.summary.total + ' tests)';
      }
    };
  }
  window.testdeckSummary = summary;
  connect();
})();
</script>
</body>
</html>
"#;

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
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

/// JSON that is safe inside a `<script>` element
fn script_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.replace("</", "<\\/"))
}

fn status_class(status: SuiteStatus) -> &'static str {
    match status {
        SuiteStatus::Passed => "passed",
        SuiteStatus::Failed => "failed",
        SuiteStatus::Error => "error",
    }
}

fn results_table(summary: &BatchSummary) -> String {
    let mut rows = String::new();
    for result in &summary.results {
        rows.push_str(&format!(
            "<tr><td>{}</td><td class=\"{}\">{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.1}s</td></tr>\n",
            escape_html(&result.display_name),
            status_class(result.status),
            result.status,
            result.passed,
            result.failed,
            result.skipped,
            result.duration_ms as f64 / 1000.0
        ));
        if let Some(error) = &result.error {
            rows.push_str(&format!(
                "<tr><td></td><td colspan=\"5\" class=\"error\">{}</td></tr>\n",
                escape_html(error)
            ));
        }
        for failure in &result.failures {
            rows.push_str(&format!(
                "<tr><td></td><td colspan=\"5\" class=\"failed\">{}: {}</td></tr>\n",
                escape_html(&failure.title),
                escape_html(&failure.message)
            ));
        }
    }

    let totals = &summary.totals;
    format!(
        "<table>\n<tr><th>Suite</th><th>Status</th><th>Passed</th><th>Failed</th><th>Skipped</th><th>Duration</th></tr>\n{}<tr class=\"totals\"><td>Total</td><td></td><td>{}</td><td>{}</td><td>{}</td><td>{:.1}s</td></tr>\n</table>",
        rows,
        totals.passed,
        totals.failed,
        totals.skipped,
        totals.duration as f64 / 1000.0
    )
}

/// Render the dashboard. Without a summary the page only shows live output.
pub fn render_dashboard(summary: Option<&BatchSummary>, ws_url: &str) -> Result<String> {
    let (generated, table) = match summary {
        Some(summary) => (
            format!("Generated {}", summary.timestamp.to_rfc3339()),
            results_table(summary),
        ),
        None => ("No batch has run yet.".to_string(), String::new()),
    };

    let generated = escape_html(&generated);
    let ws_url = script_json(&ws_url)?;
    let summary_json = script_json(&summary)?;

    // One pass over the template, so substituted text is never rescanned.
    let html = PLACEHOLDER.replace_all(TEMPLATE, |caps: &Captures| match &caps[1] {
        "GENERATED" => generated.clone(),
        "TABLE" => table.clone(),
        "WS_URL" => ws_url.clone(),
        _ => summary_json.clone(),
    });
    Ok(html.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use testdeck_common::{RunSummary, SuiteResult, TestFailure};

    fn summary() -> BatchSummary {
        let mut failing = SuiteResult::from_summary(
            "checkout",
            "Checkout <beta>",
            SuiteStatus::Failed,
            RunSummary::from_counts(5, 1, 0),
            4200,
        );
        failing.failures.push(TestFailure {
            title: "pays".to_string(),
            file: None,
            line: None,
            message: "</script><script>alert(1)</script>".to_string(),
        });
        BatchSummary::new(vec![failing])
    }

    #[test]
    fn test_embedded_json_cannot_close_script() {
        let html = render_dashboard(Some(&summary()), "ws://127.0.0.1:3001/ws").unwrap();
        assert_eq!(html.matches("</script>").count(), 2);
        assert!(html.contains("<\\/script>"));
        assert!(html.contains("Checkout &lt;beta&gt;"));
        assert!(html.contains("\"ws://127.0.0.1:3001/ws\""));
    }

    #[test]
    fn test_placeholders_in_messages_are_left_alone() {
        let mut summary = summary();
        summary.results[0].failures[0].message = "saw __SUMMARY_JSON__ and __WS_URL__".to_string();
        let html = render_dashboard(Some(&summary), "ws://localhost/ws").unwrap();

        assert!(html.contains("pays: saw __SUMMARY_JSON__ and __WS_URL__"));
        assert_eq!(html.matches("\"ws://localhost/ws\"").count(), 1);
    }

    #[test]
    fn test_render_without_summary() {
        let html = render_dashboard(None, "ws://localhost/ws").unwrap();
        assert!(html.contains("No batch has run yet."));
        assert!(html.contains(">null</script>"));
    }
}
