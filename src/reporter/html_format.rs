use std::fmt::Write as _;

use super::*;
use crate::gitlab::project_members_url;

const HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>GitLab Access Report</title>
  <style>
    body { margin: 0; font-family: "Inter", "Segoe UI", system-ui, sans-serif; color: #1f2a3a; background: #f5f1eb; }
    header { background: #0b3a2a; color: #f1f5f9; padding: 14px 18px; }
    header h1 { margin: 0; font-size: 18px; }
    header .hint { font-size: 13px; color: #dbe4e9; }
    main { max-width: 1200px; margin: 0 auto; padding: 20px 16px 32px; }
    a { color: #0b5c3d; }
    ul.users { columns: 3; }
    table { border-collapse: collapse; width: 100%; margin-bottom: 24px; background: #fbf7f1; }
    th, td { text-align: left; padding: 6px 10px; border-bottom: 1px solid #e2d6c2; }
    tr:nth-child(even) td { background: #f3ece1; }
    .warning { background: #fcefdc; border: 1px solid #e2b77a; padding: 10px 14px; }
  </style>
</head>
<body>
"#;

const TAIL: &str = "</main>\n</body>\n</html>\n";

impl AccessReporter<'_> {
    pub fn html_format<W: std::io::Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(self.render_html().as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    fn render_html(&self) -> String {
        let index = &self.aggregation.index;
        let users = index.usernames_case_insensitive();
        let mut html = String::from(HEAD);

        // Writing into a String cannot fail.
        let _ = write!(
            html,
            "<header><h1>GitLab Access Report</h1><div class=\"hint\">{} &middot; {} users across {} repositories</div></header>\n<main>\n",
            escape(self.server_url.as_str()),
            users.len(),
            self.aggregation.total
        );

        if !self.aggregation.failures.is_empty() {
            let _ = write!(
                html,
                "<p class=\"warning\">Membership of {} repositories could not be retrieved; \
                 this report is incomplete. See <a href=\"#failures\">failures</a>.</p>\n",
                self.aggregation.failures.len()
            );
        }

        html.push_str("<h2>Users:</h2>\n<ul class=\"users\">\n");
        for user in &users {
            let _ = writeln!(
                html,
                "<li><a href=\"#user-{}\">{}</a></li>",
                escape(user),
                escape(user)
            );
        }
        html.push_str("</ul>\n");

        for user in &users {
            let _ = writeln!(html, "<h2 id=\"user-{}\">@{}</h2>", escape(user), escape(user));
            html.push_str("<table>\n<tr><th>Project</th><th>Access Level</th></tr>\n");
            for record in index.get(user).unwrap_or_default() {
                let link = project_members_url(self.server_url, &record.repository);
                let _ = writeln!(
                    html,
                    "<tr><td><a href=\"{}\">{}</a></td><td>{}</td></tr>",
                    escape(&link),
                    escape(&record.repository),
                    record.access_level
                );
            }
            html.push_str("</table>\n");
        }

        if !self.aggregation.failures.is_empty() {
            html.push_str("<h2 id=\"failures\">Failures</h2>\n<table>\n");
            html.push_str("<tr><th>Project</th><th>Error</th></tr>\n");
            for failure in &self.aggregation.failures {
                let _ = writeln!(
                    html,
                    "<tr><td>{}</td><td>{}: {}</td></tr>",
                    escape(&failure.repository),
                    failure.kind,
                    escape(&failure.message)
                );
            }
            html.push_str("</table>\n");
        }

        html.push_str(TAIL);
        html
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
