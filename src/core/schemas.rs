//! Destination schema definitions.
//!
//! The destination is a single SQLite database laid out in four groups:
//! 1. Global: settings, IP networks, users, groups.
//! 2. Rooms: locations, rooms and reservations.
//! 3. Categories and events with their ACL tables.
//! 4. Event content: sessions, contributions, timetable, attachments, notes, logs.
//!
//! Principal tables share one column layout; see [`PRINCIPAL_COLUMNS`].

// --- 0. Bookkeeping ---
pub const MIGRATION_TRIGGERS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS migration_triggers (
        name TEXT PRIMARY KEY,
        enabled INTEGER NOT NULL DEFAULT 1
    )
";
pub const TRIGGER_SEED: &str =
    "INSERT OR IGNORE INTO migration_triggers (name, enabled) VALUES ('consistent_timetable', 1)";

// --- 1. Global ---
pub const SETTINGS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS settings (
        module TEXT NOT NULL,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (module, name)
    )
";
pub const IP_NETWORK_GROUPS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS ip_network_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT '',
        hidden INTEGER NOT NULL DEFAULT 0,
        attachment_access_override INTEGER NOT NULL DEFAULT 0
    )
";
pub const IP_NETWORKS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS ip_networks (
        group_id INTEGER NOT NULL REFERENCES ip_network_groups(id),
        network TEXT NOT NULL,
        PRIMARY KEY (group_id, network)
    )
";
pub const USERS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        first_name TEXT NOT NULL DEFAULT '',
        last_name TEXT NOT NULL DEFAULT '',
        title TEXT NOT NULL DEFAULT '',
        affiliation TEXT NOT NULL DEFAULT '',
        phone TEXT NOT NULL DEFAULT '',
        address TEXT NOT NULL DEFAULT '',
        email TEXT NOT NULL,
        timezone TEXT,
        language TEXT,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        is_admin INTEGER NOT NULL DEFAULT 0,
        is_system INTEGER NOT NULL DEFAULT 0,
        merged_into_id INTEGER REFERENCES users(id)
    )
";
pub const USER_SECONDARY_EMAILS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS user_secondary_emails (
        user_id INTEGER NOT NULL REFERENCES users(id),
        email TEXT NOT NULL,
        PRIMARY KEY (user_id, email)
    )
";
pub const IDENTITIES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS identities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        provider TEXT NOT NULL,
        identifier TEXT NOT NULL,
        password TEXT,
        password_hash TEXT,
        UNIQUE (provider, identifier)
    )
";
pub const FAVORITE_USERS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS favorite_users (
        user_id INTEGER NOT NULL REFERENCES users(id),
        target_id INTEGER NOT NULL REFERENCES users(id),
        PRIMARY KEY (user_id, target_id)
    )
";
pub const FAVORITE_CATEGORIES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS favorite_categories (
        user_id INTEGER NOT NULL REFERENCES users(id),
        category_id INTEGER NOT NULL REFERENCES categories(id),
        PRIMARY KEY (user_id, category_id)
    )
";
pub const GROUPS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )
";
pub const GROUP_MEMBERS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS group_members (
        group_id INTEGER NOT NULL REFERENCES groups(id),
        user_id INTEGER NOT NULL REFERENCES users(id),
        PRIMARY KEY (group_id, user_id)
    )
";

// --- 2. Rooms ---
pub const LOCATIONS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS locations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        is_default INTEGER NOT NULL DEFAULT 0
    )
";
pub const ROOMS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS rooms (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        location_id INTEGER NOT NULL REFERENCES locations(id),
        name TEXT NOT NULL,
        building TEXT NOT NULL DEFAULT '',
        floor TEXT NOT NULL DEFAULT '',
        number TEXT NOT NULL DEFAULT '',
        owner_id INTEGER NOT NULL REFERENCES users(id),
        capacity INTEGER,
        is_active INTEGER NOT NULL DEFAULT 1,
        is_reservable INTEGER NOT NULL DEFAULT 1
    )
";
pub const RESERVATIONS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS reservations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        room_id INTEGER NOT NULL REFERENCES rooms(id),
        start_dt TEXT NOT NULL,
        end_dt TEXT NOT NULL,
        booked_for_id INTEGER REFERENCES users(id),
        booked_for_name TEXT NOT NULL DEFAULT '',
        created_by_id INTEGER REFERENCES users(id),
        booking_reason TEXT NOT NULL DEFAULT '',
        is_cancelled INTEGER NOT NULL DEFAULT 0,
        is_rejected INTEGER NOT NULL DEFAULT 0
    )
";

// --- 3. Categories and events ---

/// Column layout shared by every `*_principals` table.
pub const PRINCIPAL_COLUMNS: &str = "
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        type TEXT NOT NULL,
        user_id INTEGER REFERENCES users(id),
        local_group_id INTEGER REFERENCES groups(id),
        mp_group_provider TEXT,
        mp_group_name TEXT,
        email TEXT,
        ip_network_group_id INTEGER REFERENCES ip_network_groups(id),
        read_access INTEGER NOT NULL DEFAULT 0,
        full_access INTEGER NOT NULL DEFAULT 0,
        roles TEXT NOT NULL DEFAULT ''
";

pub const CATEGORIES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER REFERENCES categories(id),
        position INTEGER NOT NULL DEFAULT 0,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        timezone TEXT NOT NULL DEFAULT 'UTC',
        visibility INTEGER,
        protection_mode TEXT NOT NULL DEFAULT 'inheriting',
        is_deleted INTEGER NOT NULL DEFAULT 0
    )
";
pub const LEGACY_CATEGORY_MAPPINGS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS legacy_category_mappings (
        legacy_category_id TEXT PRIMARY KEY,
        category_id INTEGER NOT NULL REFERENCES categories(id)
    )
";
pub const EVENTS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        category_id INTEGER REFERENCES categories(id),
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        timezone TEXT NOT NULL,
        start_dt TEXT NOT NULL,
        end_dt TEXT NOT NULL,
        created_dt TEXT,
        creator_id INTEGER REFERENCES users(id),
        type TEXT NOT NULL DEFAULT 'conference',
        visibility INTEGER,
        keywords TEXT NOT NULL DEFAULT '[]',
        venue_name TEXT NOT NULL DEFAULT '',
        room_name TEXT NOT NULL DEFAULT '',
        address TEXT NOT NULL DEFAULT '',
        own_venue_id INTEGER REFERENCES locations(id),
        own_room_id INTEGER REFERENCES rooms(id),
        protection_mode TEXT NOT NULL DEFAULT 'inheriting',
        access_key TEXT NOT NULL DEFAULT '',
        no_access_contact TEXT NOT NULL DEFAULT '',
        contact_email TEXT NOT NULL DEFAULT '',
        url_shortcut TEXT,
        is_locked INTEGER NOT NULL DEFAULT 0,
        is_deleted INTEGER NOT NULL DEFAULT 0
    )
";
pub const LEGACY_EVENT_MAPPINGS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS legacy_event_mappings (
        legacy_event_id TEXT PRIMARY KEY,
        event_id INTEGER NOT NULL REFERENCES events(id)
    )
";

// --- 4. Event content ---
pub const SESSIONS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id INTEGER NOT NULL REFERENCES events(id),
        friendly_id INTEGER NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        is_deleted INTEGER NOT NULL DEFAULT 0,
        UNIQUE (event_id, friendly_id)
    )
";
pub const LEGACY_SESSION_MAPPINGS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS legacy_session_mappings (
        event_id INTEGER NOT NULL REFERENCES events(id),
        legacy_session_id TEXT NOT NULL,
        session_id INTEGER NOT NULL REFERENCES sessions(id),
        PRIMARY KEY (event_id, legacy_session_id)
    )
";
pub const CONTRIBUTIONS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS contributions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id INTEGER NOT NULL REFERENCES events(id),
        session_id INTEGER REFERENCES sessions(id),
        friendly_id INTEGER NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        duration_minutes INTEGER NOT NULL DEFAULT 0,
        is_deleted INTEGER NOT NULL DEFAULT 0
    )
";
pub const LEGACY_CONTRIBUTION_MAPPINGS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS legacy_contribution_mappings (
        event_id INTEGER NOT NULL REFERENCES events(id),
        legacy_contribution_id TEXT NOT NULL,
        contribution_id INTEGER NOT NULL REFERENCES contributions(id),
        PRIMARY KEY (event_id, legacy_contribution_id)
    )
";
pub const TIMETABLE_ENTRIES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS timetable_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id INTEGER NOT NULL REFERENCES events(id),
        parent_id INTEGER REFERENCES timetable_entries(id),
        type TEXT NOT NULL,
        session_id INTEGER REFERENCES sessions(id),
        contribution_id INTEGER REFERENCES contributions(id),
        title TEXT NOT NULL DEFAULT '',
        start_dt TEXT NOT NULL,
        duration_minutes INTEGER NOT NULL
    )
";

/// Entries must lie inside their event. Legacy timetables often do not,
/// so migration turns the check off through `migration_triggers`.
pub const CONSISTENT_TIMETABLE_TRIGGER: &str = "
    CREATE TRIGGER IF NOT EXISTS consistent_timetable_entries
    BEFORE INSERT ON timetable_entries
    WHEN (SELECT enabled FROM migration_triggers WHERE name = 'consistent_timetable') = 1
    BEGIN
        SELECT RAISE(ABORT, 'timetable entry outside of event')
        WHERE NEW.start_dt < (SELECT start_dt FROM events WHERE id = NEW.event_id)
           OR NEW.start_dt > (SELECT end_dt FROM events WHERE id = NEW.event_id);
    END
";

pub const ATTACHMENT_FOLDERS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS attachment_folders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id INTEGER NOT NULL REFERENCES events(id),
        link_type TEXT NOT NULL,
        session_id INTEGER REFERENCES sessions(id),
        contribution_id INTEGER REFERENCES contributions(id),
        title TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        is_default INTEGER NOT NULL DEFAULT 0,
        protection_mode TEXT NOT NULL DEFAULT 'inheriting',
        is_deleted INTEGER NOT NULL DEFAULT 0
    )
";
pub const ATTACHMENTS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS attachments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        folder_id INTEGER NOT NULL REFERENCES attachment_folders(id),
        type TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        link_url TEXT,
        storage_backend TEXT,
        storage_file_id TEXT,
        filename TEXT,
        size INTEGER,
        checksum TEXT,
        user_id INTEGER REFERENCES users(id),
        is_deleted INTEGER NOT NULL DEFAULT 0
    )
";
pub const EVENT_NOTES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS event_notes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id INTEGER NOT NULL REFERENCES events(id),
        link_type TEXT NOT NULL,
        session_id INTEGER REFERENCES sessions(id),
        contribution_id INTEGER REFERENCES contributions(id),
        html TEXT NOT NULL,
        user_id INTEGER REFERENCES users(id)
    )
";
pub const EVENT_LOGS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS event_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id INTEGER NOT NULL REFERENCES events(id),
        realm TEXT NOT NULL,
        kind TEXT NOT NULL,
        module TEXT NOT NULL,
        type TEXT NOT NULL,
        summary TEXT NOT NULL,
        user_id INTEGER REFERENCES users(id),
        logged_dt TEXT NOT NULL,
        data TEXT NOT NULL DEFAULT '{}'
    )
";

pub fn principals_schema(table: &str, owner_column: &str, owner_table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
        {owner_column} INTEGER NOT NULL REFERENCES {owner_table}(id),{PRINCIPAL_COLUMNS})"
    )
}

/// Every table the migration writes to, in creation order.
pub fn destination_schema() -> Vec<String> {
    let mut statements: Vec<String> = [
        MIGRATION_TRIGGERS_SCHEMA,
        TRIGGER_SEED,
        SETTINGS_SCHEMA,
        IP_NETWORK_GROUPS_SCHEMA,
        IP_NETWORKS_SCHEMA,
        USERS_SCHEMA,
        USER_SECONDARY_EMAILS_SCHEMA,
        IDENTITIES_SCHEMA,
        FAVORITE_USERS_SCHEMA,
        GROUPS_SCHEMA,
        GROUP_MEMBERS_SCHEMA,
        LOCATIONS_SCHEMA,
        ROOMS_SCHEMA,
        RESERVATIONS_SCHEMA,
        CATEGORIES_SCHEMA,
        FAVORITE_CATEGORIES_SCHEMA,
        LEGACY_CATEGORY_MAPPINGS_SCHEMA,
        EVENTS_SCHEMA,
        LEGACY_EVENT_MAPPINGS_SCHEMA,
        SESSIONS_SCHEMA,
        LEGACY_SESSION_MAPPINGS_SCHEMA,
        CONTRIBUTIONS_SCHEMA,
        LEGACY_CONTRIBUTION_MAPPINGS_SCHEMA,
        TIMETABLE_ENTRIES_SCHEMA,
        CONSISTENT_TIMETABLE_TRIGGER,
        ATTACHMENT_FOLDERS_SCHEMA,
        ATTACHMENTS_SCHEMA,
        EVENT_NOTES_SCHEMA,
        EVENT_LOGS_SCHEMA,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    statements.push(principals_schema("category_principals", "category_id", "categories"));
    statements.push(principals_schema("event_principals", "event_id", "events"));
    statements
}

/// Tables whose contents mean a previous migration already ran.
pub const DATA_TABLES: &[&str] = &[
    "users",
    "groups",
    "categories",
    "events",
    "locations",
    "ip_network_groups",
];

/// Tables disabled together while events are migrated.
pub const TIMETABLE_TRIGGERS: &[&str] = &["consistent_timetable"];
