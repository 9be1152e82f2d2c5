// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Synthetic span sets

use trace_reducer::Span;

pub const LANDSCAPE_TOKEN: &str = "landscape";
pub const TRACE_ID: &str = "trace";
/// Start of the first window used by the builders.
pub const BASE_TIME: i64 = 1_000_000;

pub fn span(span_id: &str, parent_span_id: &str, hash: &str, start: i64, end: i64) -> Span {
    Span {
        landscape_token: LANDSCAPE_TOKEN.to_string(),
        trace_id: TRACE_ID.to_string(),
        span_id: span_id.to_string(),
        parent_span_id: parent_span_id.to_string(),
        start_time: start,
        end_time: end,
        operation_hash: hash.to_string(),
        host_ip_address: "10.0.0.1".to_string(),
        app_instance_id: "instance-1".to_string(),
        fully_qualified_operation_name: format!("net.example.Service.{hash}"),
    }
}

/// A chain `s0 <- s1 <- ... <- s{len-1}` where each span calls the next.
pub fn linear_trace(len: usize) -> Vec<Span> {
    (0..len)
        .map(|i| {
            let parent = if i == 0 {
                String::new()
            } else {
                format!("s{}", i - 1)
            };
            let offset = i as i64;
            span(
                &format!("s{i}"),
                &parent,
                &format!("op{i}"),
                BASE_TIME + offset,
                BASE_TIME + 1_000 - offset,
            )
        })
        .collect()
}

/// A root followed by `iterations` identical call chains of `length` spans.
pub fn uniform_loop(iterations: usize, length: usize) -> Vec<Span> {
    let mut spans = vec![span("root", "", "main", BASE_TIME, BASE_TIME + 5_000)];
    for it in 0..iterations {
        let mut parent = "root".to_string();
        for level in 0..length {
            let id = format!("it{it}-l{level}");
            let start = BASE_TIME + (it * length + level) as i64;
            spans.push(span(&id, &parent, &format!("body{level}"), start, start + 1));
            parent = id;
        }
    }
    spans
}

/// A connected random tree of `size` spans in shuffled order.
pub fn random_trace(size: usize, seed: u64) -> Vec<Span> {
    let mut rng = XorShift::new(seed);
    let mut spans: Vec<Span> = (0..size)
        .map(|i| {
            let parent = if i == 0 {
                String::new()
            } else {
                format!("n{}", rng.below(i))
            };
            let start = BASE_TIME + rng.below(5_000) as i64;
            let end = start + rng.below(1_000) as i64;
            span(&format!("n{i}"), &parent, &format!("op{}", rng.below(8)), start, end)
        })
        .collect();

    for i in (1..spans.len()).rev() {
        let j = rng.below(i + 1);
        spans.swap(i, j);
    }
    spans
}

struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed | 1)
    }

    fn below(&mut self, bound: usize) -> usize {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 % bound.max(1) as u64) as usize
    }
}
