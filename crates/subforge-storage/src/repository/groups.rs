//! Node group repository.

use rusqlite::{params, Connection, OptionalExtension, Row};
use subforge_core::{GroupMode, NewGroup, NodeGroup};

use crate::error::Result;
use crate::repository::json_column;

/// Repository for node group operations.
pub struct GroupsRepo;

impl GroupsRepo {
    /// Insert a new group.
    pub fn insert(conn: &Connection, group: &NewGroup) -> Result<i64> {
        conn.execute(
            "INSERT INTO node_groups (name, mode, include_patterns, exclude_patterns, active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                group.name,
                group.mode.as_str(),
                serde_json::to_string(&group.include_patterns)?,
                serde_json::to_string(&group.exclude_patterns)?,
                group.active as i32
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a group by ID.
    pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<NodeGroup>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, mode, include_patterns, exclude_patterns, active
             FROM node_groups WHERE id = ?1",
        )?;
        let group = stmt.query_row([id], map_row).optional()?;
        Ok(group)
    }

    /// Get all groups in id order.
    pub fn get_all(conn: &Connection) -> Result<Vec<NodeGroup>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, mode, include_patterns, exclude_patterns, active
             FROM node_groups ORDER BY id ASC",
        )?;
        let groups = stmt
            .query_map([], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    /// Update a group.
    pub fn update(conn: &Connection, group: &NodeGroup) -> Result<bool> {
        let updated = conn.execute(
            "UPDATE node_groups SET name = ?1, mode = ?2, include_patterns = ?3,
             exclude_patterns = ?4, active = ?5 WHERE id = ?6",
            params![
                group.name,
                group.mode.as_str(),
                serde_json::to_string(&group.include_patterns)?,
                serde_json::to_string(&group.exclude_patterns)?,
                group.active as i32,
                group.id
            ],
        )?;
        Ok(updated > 0)
    }

    /// Delete a group.
    pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
        let deleted = conn.execute("DELETE FROM node_groups WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<NodeGroup> {
    let mode: String = row.get(2)?;
    Ok(NodeGroup {
        id: row.get(0)?,
        name: row.get(1)?,
        mode: GroupMode::parse(&mode),
        include_patterns: json_column(row, 3)?,
        exclude_patterns: json_column(row, 4)?,
        active: row.get::<_, i32>(5)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::run_migrations;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn hk() -> NewGroup {
        NewGroup {
            name: "香港".into(),
            mode: GroupMode::Auto,
            include_patterns: vec!["hk".into(), "香港".into()],
            exclude_patterns: vec!["01".into()],
            active: true,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let conn = setup();
        let id = GroupsRepo::insert(&conn, &hk()).unwrap();

        let group = GroupsRepo::get_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(group, hk().into_group(id));
        assert_eq!(GroupsRepo::get_all(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_update_and_delete() {
        let conn = setup();
        let id = GroupsRepo::insert(&conn, &hk()).unwrap();
        let mut group = GroupsRepo::get_by_id(&conn, id).unwrap().unwrap();
        group.active = false;
        group.mode = GroupMode::Select;
        assert!(GroupsRepo::update(&conn, &group).unwrap());
        assert_eq!(GroupsRepo::get_by_id(&conn, id).unwrap().unwrap(), group);

        assert!(GroupsRepo::delete(&conn, id).unwrap());
        assert!(!GroupsRepo::delete(&conn, id).unwrap());
    }

    #[test]
    fn test_names_are_unique() {
        let conn = setup();
        GroupsRepo::insert(&conn, &hk()).unwrap();
        assert!(GroupsRepo::insert(&conn, &hk()).unwrap_err().is_constraint_violation());
    }

    #[test]
    fn test_corrupt_patterns_are_an_error() {
        let conn = setup();
        let id = GroupsRepo::insert(&conn, &hk()).unwrap();
        conn.execute(
            "UPDATE node_groups SET include_patterns = 'not json' WHERE id = ?1",
            [id],
        )
        .unwrap();

        assert!(GroupsRepo::get_by_id(&conn, id).is_err());
        assert!(GroupsRepo::get_all(&conn).is_err());
    }

    #[test]
    fn test_missing_group_is_none() {
        let conn = setup();
        assert_eq!(GroupsRepo::get_by_id(&conn, 999).unwrap(), None);
    }
}
