// Copyright (c) 2026 The Collector Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! `@type` annotation handling (invariant 3).

use super::Kind;

/// Build the `@type <kind> <version>\n` line for a kind's default annotation.
pub fn default_annotation(kind: Kind) -> String {
    let (token, version) = kind.default_annotation_tokens();
    annotation_line(token, version)
}

/// Build a single annotation line from its token and version.
pub fn annotation_line(token: &str, version: &str) -> String {
    format!("@type {token} {version}\n")
}

/// If `bytes` already begins with an `@type` annotation line, split it off
/// and return `(annotation_line, rest)`. Otherwise return `(None, bytes)`.
pub fn split_annotation(bytes: &[u8]) -> (Option<&[u8]>, &[u8]) {
    if bytes.first() != Some(&b'@') {
        return (None, bytes);
    }
    match bytes.iter().position(|&b| b == b'\n') {
        Some(nl) => (Some(&bytes[..=nl]), &bytes[nl + 1..]),
        None => (None, bytes),
    }
}

/// Extract the `@type token version` tokens verbatim from an annotation
/// line (used by the indexer to populate `FileNode.types`).
pub fn parse_annotation_tokens(line: &str) -> Option<String> {
    let rest = line.strip_prefix("@type ")?;
    Some(rest.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_existing_annotation() {
        let bytes = b"@type tordnsel 1.0\nExitNode ABCD\n";
        let (ann, rest) = split_annotation(bytes);
        assert_eq!(ann, Some(&b"@type tordnsel 1.0\n"[..]));
        assert_eq!(rest, &b"ExitNode ABCD\n"[..]);
    }

    #[test]
    fn no_annotation_when_first_byte_is_not_at() {
        let bytes = b"ExitNode ABCD\n";
        let (ann, rest) = split_annotation(bytes);
        assert_eq!(ann, None);
        assert_eq!(rest, &bytes[..]);
    }

    #[test]
    fn default_annotation_for_exit_list_is_tordnsel() {
        assert_eq!(default_annotation(Kind::ExitList), "@type tordnsel 1.0\n");
    }

    #[test]
    fn parses_token_and_version() {
        assert_eq!(
            parse_annotation_tokens("@type tordnsel 1.0\n"),
            Some("tordnsel 1.0".to_string())
        );
    }
}
