//! Small HTML building blocks shared by the reports.

use std::{fmt::Write, fs, path::Path};

use anyhow::{Context, Result};

/// Filters rows of `.data-row` tables by the text typed into `#search`.
pub const SEARCH_SCRIPT: &str = r#"
    <script>
        document.getElementById('search').addEventListener('keyup', function() {
            const q = this.value.toLowerCase();
            document.querySelectorAll('.data-row').forEach(row => {
                row.style.display = row.textContent.toLowerCase().includes(q) ? '' : 'none';
            });
        });
    </script>"#;

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

pub fn stat_box(num: impl ToString, label: &str) -> String {
    format!(
        "<div class='stat-box'><div class='num'>{}</div><div class='label'>{}</div></div>",
        escape(&num.to_string()),
        escape(label)
    )
}

/// A table of plain text cells, all escaped.
pub fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut html = String::from("<table>\n<thead><tr>");
    for header in headers {
        let _ = write!(html, "<th>{}</th>", escape(header));
    }
    html.push_str("</tr></thead>\n<tbody>\n");
    for row in rows {
        html.push_str("<tr>");
        for cell in row {
            let _ = write!(html, "<td>{}</td>", escape(cell));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</tbody>\n</table>");
    html
}

/// A table with a row count note, truncated to `max_rows`.
pub fn limited_table(headers: &[&str], rows: &[Vec<String>], max_rows: usize) -> String {
    if rows.is_empty() {
        return "<p><em>No rows.</em></p>".to_string();
    }

    let shown = rows.len().min(max_rows);
    let note = if rows.len() > max_rows {
        format!("<p><em>Showing first {} of {} rows.</em></p>", shown, rows.len())
    } else {
        format!("<p><em>Showing {} row{}.</em></p>", shown, if shown == 1 { "" } else { "s" })
    };
    format!("{}\n{}", note, table(headers, &rows[..shown]))
}

/// Integer with `,` thousands separators.
pub fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

pub fn write_page(path: &Path, html: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("cannot create {}", parent.display()))?;
    }
    fs::write(path, html).with_context(|| format!("cannot write {}", path.display()))
}

// -- Tests -------------------------------------------------------------------
