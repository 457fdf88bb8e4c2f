// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Natural string ordering.
//!
//! Compares embedded runs of ASCII digits by numeric value rather than
//! character by character, so `a-2 < a-3 < a-10` where plain lexicographic
//! ordering would yield `a-10 < a-2`.

use std::cmp::Ordering;

/// Compares two strings naturally.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let run_a = digit_run(a, i);
            let run_b = digit_run(b, j);
            match numeric_cmp(&a[i..run_a], &b[j..run_b]) {
                Ordering::Equal => {
                    i = run_a;
                    j = run_b;
                }
                unequal => return unequal,
            }
        } else {
            match a[i].cmp(&b[j]) {
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
                unequal => return unequal,
            }
        }
    }
    (a.len() - i).cmp(&(b.len() - j))
}

/// Sorts strings in place in natural order.
pub fn sort_naturally<S: AsRef<str>>(items: &mut [S]) {
    items.sort_by(|a, b| natural_cmp(a.as_ref(), b.as_ref()));
}

/// Returns the exclusive end of the digit run starting at `start`.
fn digit_run(s: &[u8], start: usize) -> usize {
    let mut end = start;
    while end < s.len() && s[end].is_ascii_digit() {
        end += 1;
    }
    end
}

/// Compares two all-digit byte slices by numeric value, without overflow:
/// strip leading zeros, then longer means larger, then byte order decides.
fn numeric_cmp(a: &[u8], b: &[u8]) -> Ordering {
    let a = strip_leading_zeros(a);
    let b = strip_leading_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn strip_leading_zeros(s: &[u8]) -> &[u8] {
    let first = s.iter().position(|b| *b != b'0').unwrap_or(s.len());
    &s[first..]
}
