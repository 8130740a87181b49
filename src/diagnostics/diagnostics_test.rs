// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

use super::*;

#[test]
fn render_includes_message_and_frames_innermost_first() {
    let report = PanicReport {
        message: "division by zero".into(),
        frames: vec![
            StackFrameInfo { name: "divide".into(), line: 12, source: Some("math.crucible".into()) },
            StackFrameInfo { name: "<script>".into(), line: 3, source: None },
        ],
    };
    let rendered = report.render();
    assert_eq!(
        rendered,
        "error: division by zero\n  at divide (math.crucible:12)\n  at <script> (line 3)\n"
    );
}

#[test]
fn render_with_no_frames_is_just_the_message() {
    let report = PanicReport { message: "oops".into(), frames: Vec::new() };
    assert_eq!(report.render(), "error: oops\n");
}

#[test]
fn exit_report_carries_the_code() {
    assert_eq!(render_exit(0), "exit(0)");
    assert_eq!(render_exit(7), "exit(7)");
}
