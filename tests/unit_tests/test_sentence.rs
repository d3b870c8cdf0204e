// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use routeros_collector_rs::{
    error::CollectorError,
    proto::sentence::{Reply, ReplyKind, Sentence},
};

fn words(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn builder_produces_api_word_shapes() {
    let sentence = Sentence::command("/ping")
        .attr("address", "1.1.1.1")
        .attr("count", "4")
        .api_attr("tag", "7");
    assert_eq!(sentence.words(), &[
        "/ping",
        "=address=1.1.1.1",
        "=count=4",
        ".tag=7",
    ]);
}

#[test]
fn parse_intermediate_record() -> Result<()> {
    let reply = Reply::parse(&words(&[
        "!re",
        "=seq=0",
        "=time=12ms",
        ".tag=3",
    ]))?;
    assert_eq!(reply.kind, ReplyKind::Re);
    assert!(!reply.kind.is_terminal());
    assert_eq!(reply.tag.as_deref(), Some("3"));
    assert_eq!(reply.attr("seq"), Some("0"));
    assert_eq!(reply.attr("time"), Some("12ms"));
    Ok(())
}

#[test]
fn parse_terminal_kinds() -> Result<()> {
    for (word, kind) in [
        ("!done", ReplyKind::Done),
        ("!trap", ReplyKind::Trap),
        ("!fatal", ReplyKind::Fatal),
    ] {
        let reply = Reply::parse(&words(&[word]))?;
        assert_eq!(reply.kind, kind);
        assert!(reply.kind.is_terminal());
    }
    Ok(())
}

#[test]
fn value_may_contain_equals_sign() -> Result<()> {
    let reply = Reply::parse(&words(&["!re", "=comment=a=b=c"]))?;
    assert_eq!(reply.attr("comment"), Some("a=b=c"));
    Ok(())
}

#[test]
fn trap_message_is_preserved_verbatim() -> Result<()> {
    let reply = Reply::parse(&words(&[
        "!trap",
        "=message=no such command prefix",
    ]))?;
    assert_eq!(reply.trap_message(), "no such command prefix");
    Ok(())
}

#[test]
fn empty_sentence_is_rejected() {
    let err = Reply::parse(&[]).expect_err("must reject");
    assert!(matches!(err, CollectorError::Wire(_)));
}

#[test]
fn unknown_reply_code_is_rejected() {
    let err = Reply::parse(&words(&["!what"])).expect_err("must reject");
    assert!(matches!(err, CollectorError::Wire(_)));
}
