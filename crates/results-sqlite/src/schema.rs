use reconflow_core::Tool;

pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE scope_targets (
  id              TEXT PRIMARY KEY,
  kind            TEXT NOT NULL CHECK (kind IN ('Company','Wildcard','URL')),
  mode            TEXT NOT NULL CHECK (mode IN ('Passive','Active')),
  target          TEXT NOT NULL,
  active          INTEGER NOT NULL CHECK (active IN (0,1)) DEFAULT 0,
  created_ms      INTEGER NOT NULL
);

CREATE TABLE auto_scan_config (
  id              INTEGER PRIMARY KEY CHECK (id = 1),
  config_json     TEXT NOT NULL,
  updated_ms      INTEGER NOT NULL
);

CREATE TABLE auto_scan_sessions (
  id                              TEXT PRIMARY KEY,
  scope_target_id                 TEXT NOT NULL REFERENCES scope_targets(id) ON DELETE CASCADE,
  config_snapshot                 TEXT NOT NULL,
  status                          TEXT NOT NULL CHECK (status IN ('pending','running','completed','cancelled','failed')) DEFAULT 'pending',
  started_ms                      INTEGER NOT NULL,
  ended_ms                        INTEGER,
  steps_run                       TEXT NOT NULL DEFAULT '[]',
  error_message                   TEXT,
  final_consolidated_subdomains   INTEGER,
  final_live_web_servers          INTEGER
);

CREATE TABLE auto_scan_state (
  scope_target_id TEXT PRIMARY KEY REFERENCES scope_targets(id) ON DELETE CASCADE,
  current_step    TEXT NOT NULL,
  is_paused       INTEGER NOT NULL CHECK (is_paused IN (0,1)) DEFAULT 0,
  is_cancelled    INTEGER NOT NULL CHECK (is_cancelled IN (0,1)) DEFAULT 0,
  updated_ms      INTEGER NOT NULL
);

CREATE TABLE consolidated_subdomains (
  scope_target_id TEXT NOT NULL REFERENCES scope_targets(id) ON DELETE CASCADE,
  subdomain       TEXT NOT NULL,
  created_ms      INTEGER NOT NULL,
  UNIQUE (scope_target_id, subdomain)
);

CREATE TABLE consolidated_company_domains (
  scope_target_id TEXT NOT NULL REFERENCES scope_targets(id) ON DELETE CASCADE,
  domain          TEXT NOT NULL,
  source          TEXT NOT NULL,
  source_rank     INTEGER NOT NULL DEFAULT 0,
  created_ms      INTEGER NOT NULL,
  UNIQUE (scope_target_id, domain, source)
);

CREATE TABLE consolidated_network_ranges (
  scope_target_id TEXT NOT NULL REFERENCES scope_targets(id) ON DELETE CASCADE,
  cidr_block      TEXT NOT NULL,
  asn             TEXT,
  organization    TEXT,
  description     TEXT,
  country         TEXT,
  source          TEXT NOT NULL,
  scan_type       TEXT NOT NULL DEFAULT '',
  created_ms      INTEGER NOT NULL,
  UNIQUE (scope_target_id, cidr_block, source)
);

CREATE TABLE attack_surface_assets (
  id                TEXT PRIMARY KEY,
  scope_target_id   TEXT NOT NULL REFERENCES scope_targets(id) ON DELETE CASCADE,
  asset_type        TEXT NOT NULL CHECK (asset_type IN ('asn','network_range','ip_address','live_web_server','cloud_asset','fqdn')),
  asset_identifier  TEXT NOT NULL,
  details_json      TEXT NOT NULL,
  observed_ms       INTEGER NOT NULL,
  last_updated_ms   INTEGER NOT NULL,
  created_ms        INTEGER NOT NULL,
  UNIQUE (scope_target_id, asset_type, asset_identifier)
);

CREATE TABLE attack_surface_relationships (
  id                TEXT PRIMARY KEY,
  parent_asset_id   TEXT NOT NULL REFERENCES attack_surface_assets(id) ON DELETE CASCADE,
  child_asset_id    TEXT NOT NULL REFERENCES attack_surface_assets(id) ON DELETE CASCADE,
  relationship_type TEXT NOT NULL,
  relationship_data TEXT,
  created_ms        INTEGER NOT NULL,
  UNIQUE (parent_asset_id, child_asset_id, relationship_type)
);

CREATE TABLE attack_surface_dns_records (
  id              TEXT PRIMARY KEY,
  asset_id        TEXT NOT NULL REFERENCES attack_surface_assets(id) ON DELETE CASCADE,
  record_type     TEXT NOT NULL,
  record_value    TEXT NOT NULL,
  ttl             INTEGER,
  created_ms      INTEGER NOT NULL,
  UNIQUE (asset_id, record_type, record_value)
);

CREATE TABLE attack_surface_metadata (
  id              TEXT PRIMARY KEY,
  asset_id        TEXT NOT NULL REFERENCES attack_surface_assets(id) ON DELETE CASCADE,
  metadata_type   TEXT NOT NULL,
  metadata_key    TEXT NOT NULL,
  metadata_value  TEXT,
  metadata_json   TEXT,
  created_ms      INTEGER NOT NULL,
  UNIQUE (asset_id, metadata_type, metadata_key)
);

CREATE INDEX idx_sessions_target ON auto_scan_sessions(scope_target_id, started_ms);
CREATE INDEX idx_sessions_status ON auto_scan_sessions(status);
CREATE INDEX idx_assets_target ON attack_surface_assets(scope_target_id, asset_type);
CREATE INDEX idx_rel_child ON attack_surface_relationships(child_asset_id);
CREATE INDEX idx_dns_asset ON attack_surface_dns_records(asset_id);
CREATE INDEX idx_meta_asset ON attack_surface_metadata(asset_id);

COMMIT;
"#
;

/// Scan table for one tool. Every tool gets the same shape.
pub fn tool_table_ddl(tool: Tool) -> String {
    let t = tool.table();
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {t} (
  scan_id               TEXT PRIMARY KEY,
  scope_target_id       TEXT NOT NULL REFERENCES scope_targets(id) ON DELETE CASCADE,
  auto_scan_session_id  TEXT REFERENCES auto_scan_sessions(id) ON DELETE SET NULL,
  status                TEXT NOT NULL CHECK (status IN ('pending','running','success','failed')),
  result                TEXT,
  error                 TEXT,
  stdout                TEXT,
  stderr                TEXT,
  command               TEXT,
  execution_time        TEXT,
  created_ms            INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_{t}_target ON {t}(scope_target_id, status, created_ms);
"#
    )
}
