// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use bicopilot::agents::{clean_sql, extract_json_block};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Reply<'a> {
    content: &'a str,
}

// LLM replies are untrusted text; the cleaners must never panic on them
fuzz_target!(|reply: Reply<'_>| {
    let _ = clean_sql(reply.content);
    let _ = extract_json_block(reply.content);
});
