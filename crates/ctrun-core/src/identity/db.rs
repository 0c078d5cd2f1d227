//! passwd and group database parsing.

/// One passwd entry (only the fields ctrun needs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    /// Login name.
    pub name: String,
    /// Numeric user ID.
    pub uid: u32,
    /// Numeric primary group ID.
    pub gid: u32,
    /// Home directory.
    pub home: String,
}

/// One group entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    /// Group name.
    pub name: String,
    /// Numeric group ID.
    pub gid: u32,
    /// Supplementary members.
    pub members: Vec<String>,
}

/// Parses passwd-format content, skipping comments and malformed lines.
#[must_use]
pub fn parse_passwd(content: &str) -> Vec<PasswdEntry> {
    content.lines().filter_map(parse_passwd_line).collect()
}

/// Parses group-format content, skipping comments and malformed lines.
#[must_use]
pub fn parse_group(content: &str) -> Vec<GroupEntry> {
    content.lines().filter_map(parse_group_line).collect()
}

// name:password:uid:gid:gecos:home:shell
fn parse_passwd_line(line: &str) -> Option<PasswdEntry> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 4 || fields[0].is_empty() {
        return None;
    }
    Some(PasswdEntry {
        name: fields[0].to_string(),
        uid: fields[2].parse().ok()?,
        gid: fields[3].parse().ok()?,
        home: fields.get(5).copied().unwrap_or_default().to_string(),
    })
}

// name:password:gid:member,member
fn parse_group_line(line: &str) -> Option<GroupEntry> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 3 || fields[0].is_empty() {
        return None;
    }
    let members = fields
        .get(3)
        .map(|m| {
            m.split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(GroupEntry {
        name: fields[0].to_string(),
        gid: fields[2].parse().ok()?,
        members,
    })
}
