//! Database schema and migrations for chanwarden.
//!
//! Migrations are applied sequentially when the database is first opened or
//! upgraded. Timestamps are fixed-width RFC3339 UTC text, IP range bounds
//! are big-endian BLOBs (4 bytes for IPv4, 16 for IPv6).

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: IP bans, their audit trail and appeals
    r#"
CREATE TABLE ip_ban (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    range_start         BLOB NOT NULL,
    range_end           BLOB NOT NULL,
    board_id            INTEGER,                -- NULL = all boards
    staff_id            INTEGER,                -- NULL = issued by a filter
    banned_for_post_id  INTEGER,
    copy_post_text      TEXT NOT NULL DEFAULT '',
    issued_at           TEXT NOT NULL,
    expires_at          TEXT,                   -- ignored when permanent
    permanent           INTEGER NOT NULL DEFAULT 0,
    can_appeal          INTEGER NOT NULL DEFAULT 1,
    appeal_at           TEXT NOT NULL,
    is_thread_ban       INTEGER NOT NULL DEFAULT 0,
    message             TEXT NOT NULL,
    staff_note          TEXT NOT NULL DEFAULT '',
    is_active           INTEGER NOT NULL DEFAULT 1,
    deactivated_by      INTEGER,
    deactivated_at      TEXT,
    CHECK (length(range_start) = length(range_end)),
    CHECK (range_start <= range_end)
);

CREATE INDEX idx_ip_ban_range ON ip_ban(is_active, range_start, range_end);
CREATE INDEX idx_ip_ban_board ON ip_ban(board_id);

CREATE TABLE ip_ban_audit (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    ip_ban_id   INTEGER NOT NULL REFERENCES ip_ban(id),
    changed_at  TEXT NOT NULL,
    staff_id    INTEGER,
    is_active   INTEGER NOT NULL,
    message     TEXT NOT NULL,
    staff_note  TEXT NOT NULL
);

CREATE INDEX idx_ip_ban_audit_ban ON ip_ban_audit(ip_ban_id);

CREATE TABLE ip_ban_appeal (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    ip_ban_id       INTEGER NOT NULL REFERENCES ip_ban(id),
    appeal_text     TEXT NOT NULL,
    staff_id        INTEGER,
    staff_response  TEXT,
    status          TEXT NOT NULL DEFAULT 'pending',  -- 'pending', 'approved', 'denied'
    created_at      TEXT NOT NULL
);

CREATE INDEX idx_ip_ban_appeal_ban ON ip_ban_appeal(ip_ban_id);
"#,
    // v2: Username, filename and checksum bans
    r#"
CREATE TABLE name_ban (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    pattern         TEXT NOT NULL,
    is_regex        INTEGER NOT NULL DEFAULT 0,
    board_id        INTEGER,
    staff_id        INTEGER,
    staff_note      TEXT NOT NULL DEFAULT '',
    issued_at       TEXT NOT NULL,
    expires_at      TEXT,
    permanent       INTEGER NOT NULL DEFAULT 1,
    is_active       INTEGER NOT NULL DEFAULT 1,
    deactivated_by  INTEGER,
    deactivated_at  TEXT
);

CREATE TABLE filename_ban (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    pattern         TEXT NOT NULL,
    is_regex        INTEGER NOT NULL DEFAULT 0,
    board_id        INTEGER,
    staff_id        INTEGER,
    staff_note      TEXT NOT NULL DEFAULT '',
    issued_at       TEXT NOT NULL,
    expires_at      TEXT,
    permanent       INTEGER NOT NULL DEFAULT 1,
    is_active       INTEGER NOT NULL DEFAULT 1,
    deactivated_by  INTEGER,
    deactivated_at  TEXT
);

CREATE TABLE checksum_ban (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    pattern         TEXT NOT NULL,
    is_regex        INTEGER NOT NULL DEFAULT 0,
    board_id        INTEGER,
    staff_id        INTEGER,
    staff_note      TEXT NOT NULL DEFAULT '',
    issued_at       TEXT NOT NULL,
    expires_at      TEXT,
    permanent       INTEGER NOT NULL DEFAULT 1,
    is_active       INTEGER NOT NULL DEFAULT 1,
    deactivated_by  INTEGER,
    deactivated_at  TEXT
);

CREATE INDEX idx_name_ban_active ON name_ban(is_active);
CREATE INDEX idx_filename_ban_active ON filename_ban(is_active);
CREATE INDEX idx_checksum_ban_pattern ON checksum_ban(pattern);
"#,
    // v3: Perceptual fingerprint bans
    r#"
CREATE TABLE file_ban (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint     TEXT NOT NULL,
    fingerprinter   TEXT NOT NULL DEFAULT 'ahash',
    board_id        INTEGER,
    staff_id        INTEGER,
    staff_note      TEXT NOT NULL DEFAULT '',
    issued_at       TEXT NOT NULL,
    ban_ip          INTEGER NOT NULL DEFAULT 0,
    ban_ip_message  TEXT,
    is_active       INTEGER NOT NULL DEFAULT 1,
    deactivated_by  INTEGER,
    deactivated_at  TEXT
);

CREATE INDEX idx_file_ban_fingerprint ON file_ban(fingerprinter, fingerprint);
"#,
    // v4: Filters, their conditions, board scopes and hits
    r#"
CREATE TABLE filters (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    staff_id      INTEGER,
    staff_note    TEXT NOT NULL DEFAULT '',
    issued_at     TEXT NOT NULL,
    match_action  TEXT NOT NULL,            -- 'reject', 'ban', 'log', 'replace'
    match_detail  TEXT NOT NULL DEFAULT '',
    is_active     INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX idx_filters_active ON filters(is_active, match_action);

CREATE TABLE filter_conditions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    filter_id   INTEGER NOT NULL REFERENCES filters(id) ON DELETE CASCADE,
    position    INTEGER NOT NULL,
    field       TEXT NOT NULL,
    match_mode  TEXT NOT NULL,
    search      TEXT NOT NULL
);

CREATE INDEX idx_filter_conditions_filter ON filter_conditions(filter_id, position);

CREATE TABLE filter_boards (
    filter_id  INTEGER NOT NULL REFERENCES filters(id) ON DELETE CASCADE,
    board_id   INTEGER NOT NULL,
    PRIMARY KEY (filter_id, board_id)
);

CREATE TABLE filter_hits (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    filter_id   INTEGER NOT NULL REFERENCES filters(id) ON DELETE CASCADE,
    post_data   TEXT NOT NULL,              -- JSON
    match_time  TEXT NOT NULL
);

CREATE INDEX idx_filter_hits_filter ON filter_hits(filter_id);
"#,
    // v5: Post log backing the first-time poster conditions
    r#"
CREATE TABLE post_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    ip          BLOB NOT NULL,
    board_id    INTEGER NOT NULL,
    posted_at   TEXT NOT NULL
);

CREATE INDEX idx_post_log_ip ON post_log(ip, board_id);
"#,
];
