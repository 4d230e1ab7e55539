//! C1 — Snippet Parser.
//!
//! Parses one app's route-declaration file into a [`Snippet`]. The on-disk format is a
//! restricted, location-style block syntax: `location <match> <path> { <directives> }`.
//! A malformed block is dropped with a [`ParseError`] attached to the snippet; it never
//! invalidates the rest of the file.

use sha2::{Digest, Sha256};

use crate::types::{HttpsRedirectPolicy, MatchKind, ParseError, Route, RouteFlags, Snippet, UpstreamTarget};

/// Parses snippet `contents` read from `file_path`, attributing `app_name` to every route.
pub fn parse_snippet(app_name: &str, file_path: &str, contents: &str) -> Snippet {
	let mut routes = Vec::new();
	let mut parse_errors = Vec::new();

	let lines: Vec<&str> = contents.lines().collect();
	let mut i = 0;
	while i < lines.len() {
		let line = lines[i].trim();
		if line.is_empty() || line.starts_with('#') {
			i += 1;
			continue;
		}
		if let Some(rest) = line.strip_prefix("location") {
			let header_line = i + 1;
			let Some(open_at) = find_block_open(&lines, i) else {
				parse_errors.push(ParseError { line: header_line, message: "unterminated location block".to_string() });
				break;
			};
			let Some(close_at) = find_block_close(&lines, open_at) else {
				parse_errors.push(ParseError { line: header_line, message: "missing closing brace".to_string() });
				break;
			};
			match parse_block_header(rest) {
				Ok((match_kind, path)) => {
					let body = &lines[open_at + 1..close_at];
					match parse_block_body(body) {
						Ok((upstream_target, flags, opaque_directives)) => {
							routes.push(Route {
								path,
								match_kind,
								upstream_target,
								flags,
								source_file: file_path.to_string(),
								line_span: (header_line, close_at + 1),
								opaque_directives,
							});
						},
						Err(message) => parse_errors.push(ParseError { line: header_line, message }),
					}
				},
				Err(message) => parse_errors.push(ParseError { line: header_line, message }),
			}
			i = close_at + 1;
			continue;
		}
		parse_errors.push(ParseError { line: i + 1, message: format!("unrecognized directive: {line}") });
		i += 1;
	}

	Snippet {
		app_name: app_name.to_string(),
		file_path: file_path.into(),
		checksum: checksum_of(contents),
		routes,
		parse_errors,
	}
}

fn find_block_open(lines: &[&str], from: usize) -> Option<usize> {
	lines.iter().enumerate().skip(from).find(|(_, l)| l.contains('{')).map(|(idx, _)| idx)
}

fn find_block_close(lines: &[&str], from_open: usize) -> Option<usize> {
	let mut depth = 0i32;
	for (idx, l) in lines.iter().enumerate().skip(from_open) {
		depth += l.matches('{').count() as i32;
		depth -= l.matches('}').count() as i32;
		if depth <= 0 {
			return Some(idx);
		}
	}
	None
}

fn parse_block_header(rest: &str) -> Result<(MatchKind, String), String> {
	let rest = rest.split('{').next().unwrap_or("").trim();
	if let Some(path) = rest.strip_prefix('=') {
		let path = path.trim();
		if path.is_empty() {
			return Err("exact location missing path".to_string());
		}
		return Ok((MatchKind::Exact, path.to_string()));
	}
	if let Some(pattern) = rest.strip_prefix('~') {
		let pattern = pattern.trim();
		if pattern.is_empty() {
			return Err("regex location missing pattern".to_string());
		}
		if regex::Regex::new(pattern).is_err() {
			return Err(format!("invalid regex: {pattern}"));
		}
		return Ok((MatchKind::Regex, pattern.to_string()));
	}
	let path = rest.trim();
	if path.is_empty() {
		return Err("prefix location missing path".to_string());
	}
	Ok((MatchKind::Prefix, path.to_string()))
}

fn parse_block_body(lines: &[&str]) -> Result<(UpstreamTarget, RouteFlags, Vec<String>), String> {
	let mut upstream = None;
	let mut flags = RouteFlags::default();
	let mut opaque = Vec::new();

	for raw in lines {
		let line = raw.trim().trim_end_matches(';').trim();
		if line.is_empty() || line.starts_with('#') {
			continue;
		}
		let mut parts = line.splitn(2, char::is_whitespace);
		let directive = parts.next().unwrap_or("");
		let arg = parts.next().unwrap_or("").trim();
		match directive {
			"proxy_pass" => upstream = Some(parse_upstream_target(arg)?),
			"strip_prefix" => flags.strip_prefix = true,
			"websocket" => flags.websocket = true,
			"forwarded_prefix" => flags.forwarded_prefix = true,
			"https_redirect_policy" => {
				flags.https_redirect_policy = match arg {
					"preserve" => HttpsRedirectPolicy::Preserve,
					"force-https" => HttpsRedirectPolicy::ForceHttps,
					"relative" => HttpsRedirectPolicy::Relative,
					other => return Err(format!("unknown https_redirect_policy: {other}")),
				};
			},
			_ => opaque.push(raw.trim().to_string()),
		}
	}

	let upstream = upstream.ok_or_else(|| "block has no proxy_pass directive".to_string())?;
	Ok((upstream, flags, opaque))
}

fn parse_upstream_target(arg: &str) -> Result<UpstreamTarget, String> {
	if arg.is_empty() {
		return Err("proxy_pass missing target".to_string());
	}
	if let Some((host, port)) = arg.rsplit_once(':') {
		if let Ok(port) = port.parse::<u16>() {
			if !host.is_empty() {
				return Ok(UpstreamTarget::Literal { host: host.to_string(), port });
			}
		}
	}
	Ok(UpstreamTarget::Symbol { name: arg.to_string() })
}

/// Whitespace-insensitive checksum used for change detection: two snippets that differ only
/// by formatting hash identically.
pub fn checksum_of(contents: &str) -> String {
	let normalized: Vec<&str> = contents.split_whitespace().collect();
	let mut hasher = Sha256::new();
	hasher.update(normalized.join(" ").as_bytes());
	hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::MatchKind;

	#[test]
	fn parses_prefix_route_with_flags() {
		let snip = parse_snippet(
			"a",
			"a.conf",
			r#"
				location /api/ {
					proxy_pass svcA:8000;
					strip_prefix;
					websocket;
				}
			"#,
		);
		assert!(snip.parse_errors.is_empty());
		assert_eq!(snip.routes.len(), 1);
		let r = &snip.routes[0];
		assert_eq!(r.match_kind, MatchKind::Prefix);
		assert_eq!(r.path, "/api/");
		assert!(r.flags.strip_prefix);
		assert!(r.flags.websocket);
		assert_eq!(r.upstream_target, UpstreamTarget::Literal { host: "svcA".to_string(), port: 8000 });
	}

	#[test]
	fn parses_exact_and_regex_blocks() {
		let snip = parse_snippet(
			"a",
			"a.conf",
			r#"
				location = /exact {
					proxy_pass up1;
				}
				location ~ ^/img/.*\.png$ {
					proxy_pass svcB:9000;
				}
			"#,
		);
		assert_eq!(snip.routes.len(), 2);
		assert_eq!(snip.routes[0].match_kind, MatchKind::Exact);
		assert_eq!(snip.routes[0].upstream_target, UpstreamTarget::Symbol { name: "up1".to_string() });
		assert_eq!(snip.routes[1].match_kind, MatchKind::Regex);
	}

	#[test]
	fn bad_block_is_dropped_but_rest_of_file_survives() {
		let snip = parse_snippet(
			"a",
			"a.conf",
			r#"
				location /broken/ {
					strip_prefix;
				}
				location /ok/ {
					proxy_pass svcC:7000;
				}
			"#,
		);
		assert_eq!(snip.parse_errors.len(), 1);
		assert_eq!(snip.routes.len(), 1);
		assert_eq!(snip.routes[0].path, "/ok/");
	}

	#[test]
	fn unknown_directives_are_preserved_verbatim() {
		let snip = parse_snippet(
			"a",
			"a.conf",
			r#"
				location /api/ {
					proxy_pass svcA:8000;
					custom_directive foo bar;
				}
			"#,
		);
		assert_eq!(snip.routes[0].opaque_directives, vec!["custom_directive foo bar;"]);
	}

	#[test]
	fn checksum_is_whitespace_insensitive() {
		let a = checksum_of("location /api/ {\n  proxy_pass svcA:8000;\n}\n");
		let b = checksum_of("location /api/ { proxy_pass svcA:8000; }");
		assert_eq!(a, b);
	}
}
