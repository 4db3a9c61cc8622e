use chrono::{Local, TimeZone};

use crate::core::context::ContextBlock;
use crate::core::dispatch::route_directive;
use crate::core::gate::Connector;
use crate::tools::{send_email_spec, send_message_spec};

fn fixed_now() -> chrono::DateTime<Local> {
    Local
        .with_ymd_and_hms(2024, 3, 15, 14, 5, 0)
        .single()
        .expect("valid local time")
}

#[test]
fn plain_directive_carries_date_and_forbids_tool_pretending() {
    let d = route_directive(fixed_now(), &[], &[], None);
    assert!(d.contains("Friday, March 15, 2024 at 02:05 PM"));
    assert!(d.contains("Do not pretend to use any tools"));
    assert!(!d.contains("Tool contract"));
}

#[test]
fn tool_directive_states_single_call_and_recipient_rule() {
    let d = route_directive(fixed_now(), &[], &[send_email_spec()], None);
    assert!(d.contains("at most ONE tool"));
    assert!(d.contains("specific recipient AND the exact content"));
    assert!(d.contains("send_email"));
    assert!(!d.contains("send_message"));
}

#[test]
fn context_blocks_are_embedded_in_order() {
    let blocks = vec![
        ContextBlock {
            connector: Connector::Texts,
            text: "[Alex] +1: hi".into(),
            available: true,
        },
        ContextBlock {
            connector: Connector::Files,
            text: "(This source is unavailable right now: boom)".into(),
            available: false,
        },
    ];
    let d = route_directive(fixed_now(), &blocks, &[], None);
    let texts_at = d.find("Recent messages").unwrap();
    let files_at = d.find("Relevant document excerpts").unwrap();
    assert!(texts_at < files_at);
    assert!(d.contains("unavailable right now: boom"));
}

#[test]
fn self_handle_only_mentioned_with_tools() {
    let with_tools = route_directive(fixed_now(), &[], &[send_message_spec()], Some("+1555"));
    assert!(with_tools.contains("+1555"));
    let plain = route_directive(fixed_now(), &[], &[], Some("+1555"));
    assert!(!plain.contains("+1555"));
}
