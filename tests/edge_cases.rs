use shimmyblocks::{render_str, Engine, EngineConfig, Error, Value, ValueMap};

fn vars(pairs: Vec<(&str, Value)>) -> ValueMap {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn sections() -> Value {
    Value::from(vec![
        [("slug", "intro"), ("body", "Welcome.")].into_iter().collect::<Value>(),
        [("slug", "guestbook"), ("body", "Hello <world> & \"friends\"")]
            .into_iter()
            .collect::<Value>(),
    ])
}

// ── Literal and whitespace handling ──

#[test]
fn plain_text_template_no_tags() {
    let source = "Hello, world!\n\t  trailing  \r\n";
    assert_eq!(render_str(source, ValueMap::new()).unwrap(), source);
}

#[test]
fn empty_template_renders_empty() {
    assert_eq!(render_str("", ValueMap::new()).unwrap(), "");
}

#[test]
fn whitespace_around_tags_is_preserved() {
    let out = render_str("a\n{% if true %}\nb\n{% endif %}\nc", ValueMap::new()).unwrap();
    assert_eq!(out, "a\n\nb\n\nc");
}

#[test]
fn trim_blocks_drops_newline_after_statements() {
    let engine = Engine::with_config(EngineConfig::default().trim_blocks(true));
    engine
        .register("t", "{% for s in sections %}\n{{ s.slug }}\n{% endfor %}\n")
        .unwrap();
    let out = engine.render("t", vars(vec![("sections", sections())])).unwrap();
    assert_eq!(out, "intro\nguestbook\n");
}

#[test]
fn unicode_content() {
    let out = render_str("{{ greeting }} 🌍", vars(vec![("greeting", "こんにちは".into())])).unwrap();
    assert_eq!(out, "こんにちは 🌍");
}

#[test]
fn comments_are_not_rendered() {
    assert_eq!(render_str("a{# hidden #}b", ValueMap::new()).unwrap(), "ab");
}

// ── Expressions ──

#[test]
fn dot_access_and_bracket_access_equivalent() {
    let ctx = vars(vec![("sections", sections())]);
    let a = render_str("{% for s in sections %}{{ s.slug }}{% endfor %}", ctx.clone()).unwrap();
    let b = render_str("{% for s in sections %}{{ s['slug'] }}{% endfor %}", ctx).unwrap();
    assert_eq!(a, b);
    assert_eq!(a, "introguestbook");
}

#[test]
fn loop_first_and_last_multiple_items() {
    let out = render_str(
        "{% for s in sections %}{% if loop.first %}[{% endif %}{{ s.slug }}{% if loop.last %}]{% else %},{% endif %}{% endfor %}",
        vars(vec![("sections", sections())]),
    )
    .unwrap();
    assert_eq!(out, "[intro,guestbook]");
}

#[test]
fn or_operator_in_condition() {
    let out = render_str(
        "{% for p in pages %}{% if p == 'about' or p == 'contact' %}Y{% else %}N{% endif %}{% endfor %}",
        vars(vec![("pages", Value::from(vec!["index", "about", "contact"]))]),
    )
    .unwrap();
    assert_eq!(out, "NYY");
}

#[test]
fn elif_chain() {
    let out = render_str(
        "{% for p in pages %}{% if p == 'index' %}H{% elif p != 'draft' %}P{% else %}D{% endif %}{% endfor %}",
        vars(vec![("pages", Value::from(vec!["index", "about", "draft"]))]),
    )
    .unwrap();
    assert_eq!(out, "HPD");
}

#[test]
fn string_concat_multiple_parts() {
    let out = render_str("{{ 'A' + 'B' + name + 'D' }}", vars(vec![("name", "x".into())])).unwrap();
    assert_eq!(out, "ABxD");
}

#[test]
fn special_characters_are_escaped() {
    let out = render_str(
        "{% for s in sections %}{% if loop.last %}{{ s.body }}{% endif %}{% endfor %}",
        vars(vec![("sections", sections())]),
    )
    .unwrap();
    assert_eq!(out, "Hello &lt;world&gt; &amp; &quot;friends&quot;");
}

#[test]
fn safe_value_is_not_double_escaped() {
    let out = render_str(
        "<head>{{ css }}</head>{{ css | e }}",
        vars(vec![("css", Value::safe("<link href=\"a.css\">"))]),
    )
    .unwrap();
    assert_eq!(out, "<head><link href=\"a.css\"></head><link href=\"a.css\">");
}

#[test]
fn missing_flag_is_falsy() {
    let out = render_str(
        "{% for p in pages %}{{ p }}{% if loop.last and show_footer %}FOOTER{% endif %}{% endfor %}",
        vars(vec![("pages", Value::from(vec!["index"]))]),
    )
    .unwrap();
    assert_eq!(out, "index");
}

#[test]
fn nested_loops_restore_outer_loop_metadata() {
    let out = render_str(
        "{% for row in rows %}{% for cell in row %}{{ cell }}{% endfor %}{{ loop.index }};{% endfor %}",
        vars(vec![(
            "rows",
            Value::from(vec![Value::from(vec![1, 2]), Value::from(vec![3])]),
        )]),
    )
    .unwrap();
    assert_eq!(out, "121;32;");
}

// ── Failures ──

#[test]
fn syntax_errors_carry_positions() {
    let err = render_str("line one\n{{ user.name ", ValueMap::new()).unwrap_err();
    match err {
        Error::Syntax(e) => {
            assert_eq!(e.line, 2);
            assert!(e.message.contains("expected '}}'"), "{}", e.message);
        }
        other => panic!("expected syntax error, got {other:?}"),
    }
}

#[test]
fn mismatched_closer_is_a_syntax_error() {
    assert!(matches!(
        render_str("{{ name %}", ValueMap::new()),
        Err(Error::Syntax(_))
    ));
}

#[test]
fn unknown_statement_is_a_syntax_error() {
    assert!(matches!(
        render_str("{% macro x %}", ValueMap::new()),
        Err(Error::Syntax(_))
    ));
}
