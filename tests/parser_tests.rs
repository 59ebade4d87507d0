use folioseed::sql_parser::{classify, parse, should_skip_statement};
use folioseed::types::{ExecuteOptions, Operation};

/// Trimmed-down `pg_dump --inserts` style output for the portfolio schema
const PORTFOLIO_DUMP: &str = r#"--
-- PostgreSQL database dump
--

\restrict abc123

SET statement_timeout = 0;
SET standard_conforming_strings = on;
SELECT pg_catalog.set_config('search_path', '', false);

CREATE FUNCTION public.touch_updated_at() RETURNS trigger
    LANGUAGE plpgsql
    AS $_$
BEGIN
    NEW.updated_at := now(); -- keep in sync
    RETURN NEW;
END;
$_$;

ALTER FUNCTION public.touch_updated_at() OWNER TO folio;

CREATE TABLE public.api_keys (
    id integer NOT NULL,
    key text NOT NULL
);

CREATE SEQUENCE public.api_keys_id_seq
    AS integer
    START WITH 1
    INCREMENT BY 1;

CREATE TABLE public.posts (
    id integer NOT NULL,
    title text NOT NULL,
    body text
);

COPY public.api_keys (id, key) FROM stdin;
1	sk_live_should_never_leave_prod
\.

COPY public.posts (id, title, body) FROM stdin;
1	Hello; world	First post with a ; inside
2	It's	\N
\.

INSERT INTO public.posts VALUES (3, 'Quotes ''and'' semicolons;', NULL);

SELECT pg_catalog.setval('public.api_keys_id_seq', 1, true);

ALTER TABLE ONLY public.api_keys
    ADD CONSTRAINT api_keys_pkey PRIMARY KEY (id);

ALTER TABLE ONLY public.posts
    ADD CONSTRAINT posts_pkey PRIMARY KEY (id);

CREATE UNIQUE INDEX api_keys_key_idx ON public.api_keys USING btree (key);

\unrestrict abc123
"#;

#[test]
fn test_full_dump_is_split_into_statements() {
    let statements = parse(PORTFOLIO_DUMP.as_bytes()).expect("dump should parse");

    assert_eq!(statements.len(), 15);
    assert!(statements.iter().all(|s| !s.sql.ends_with(';')));
    assert!(statements.iter().all(|s| !s.sql.starts_with('\\')));

    let function = &statements[3];
    assert!(function.sql.starts_with("CREATE FUNCTION public.touch_updated_at()"));
    assert!(function.sql.contains("NEW.updated_at := now(); -- keep in sync"));
    assert!(function.sql.ends_with("$_$"));

    let copies: Vec<_> = statements.iter().filter(|s| s.is_copy).collect();
    assert_eq!(copies.len(), 2);
    assert_eq!(
        copies[1].copy_payload.as_deref(),
        Some(&b"1\tHello; world\tFirst post with a ; inside\n2\tIt's\t\\N\n"[..])
    );
}

#[test]
fn test_dump_targets() {
    let statements = parse(PORTFOLIO_DUMP.as_bytes()).unwrap();
    let targets: Vec<Option<(String, Operation)>> = statements
        .iter()
        .map(|s| classify(&s.sql).map(|t| (t.identifier, t.operation)))
        .collect();

    let expected = [
        None,
        None,
        None,
        None,
        None,
        Some(("public.api_keys", Operation::CreateTable)),
        None,
        Some(("public.posts", Operation::CreateTable)),
        Some(("public.api_keys", Operation::Copy)),
        Some(("public.posts", Operation::Copy)),
        Some(("public.posts", Operation::Insert)),
        Some(("public.api_keys_id_seq", Operation::SetSequenceValue)),
        Some(("public.api_keys", Operation::AlterTable)),
        Some(("public.posts", Operation::AlterTable)),
        Some(("public.api_keys", Operation::CreateIndex)),
    ];
    let expected: Vec<Option<(String, Operation)>> = expected
        .into_iter()
        .map(|e| e.map(|(id, op)| (id.to_string(), op)))
        .collect();

    assert_eq!(targets, expected);
}

#[test]
fn test_excluding_credentials_keeps_content() {
    let statements = parse(PORTFOLIO_DUMP.as_bytes()).unwrap();
    let options = ExecuteOptions::for_seed(["API_KEYS"]);

    let skipped: Vec<usize> = statements
        .iter()
        .enumerate()
        .filter(|(_, s)| should_skip_statement(s, &options.skip_identifiers).skip)
        .map(|(i, _)| i + 1)
        .collect();

    // CREATE TABLE, COPY, setval, constraint and index of api_keys
    assert_eq!(skipped, vec![6, 9, 12, 13, 15]);
    assert!(options.disable_constraints);
}
