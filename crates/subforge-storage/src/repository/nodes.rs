//! Nodes repository.
//!
//! Each row holds one node as JSON. Rows are only ever written by
//! [`NodesRepo::replace`].

use rusqlite::{params, Connection};
use subforge_core::Node;

use crate::error::Result;

/// Repository for node operations.
pub struct NodesRepo;

impl NodesRepo {
    /// Replace every node of a subscription. Callers wrap this in a transaction.
    pub fn replace(conn: &Connection, subscription_id: i64, nodes: &[Node]) -> Result<()> {
        conn.execute(
            "DELETE FROM nodes WHERE subscription_id = ?1",
            [subscription_id],
        )?;

        let mut stmt = conn.prepare(
            "INSERT INTO nodes (subscription_id, node_id, position, data)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (position, node) in nodes.iter().enumerate() {
            let data = serde_json::to_string(node)?;
            stmt.execute(params![subscription_id, node.id, position as i64, data])?;
        }
        Ok(())
    }

    /// All nodes, by subscription then body order.
    pub fn get_all(conn: &Connection) -> Result<Vec<Node>> {
        let mut stmt =
            conn.prepare("SELECT data FROM nodes ORDER BY subscription_id ASC, position ASC")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        decode(rows)
    }

    /// Nodes owned by one subscription.
    pub fn get_by_subscription(conn: &Connection, subscription_id: i64) -> Result<Vec<Node>> {
        let mut stmt = conn
            .prepare("SELECT data FROM nodes WHERE subscription_id = ?1 ORDER BY position ASC")?;
        let rows = stmt
            .query_map([subscription_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        decode(rows)
    }

    /// Count all nodes.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn decode(rows: Vec<String>) -> Result<Vec<Node>> {
    rows.iter()
        .map(|data| Ok(serde_json::from_str(data)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::SubscriptionsRepo;
    use crate::schema::run_migrations;
    use subforge_core::{NewSubscription, Protocol};

    fn setup() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();
        let id = SubscriptionsRepo::insert(
            &conn,
            &NewSubscription {
                name: "s".into(),
                url: "https://a.com/sub".into(),
            },
        )
        .unwrap();
        (conn, id)
    }

    fn node(name: &str) -> Node {
        let mut n = Node::new(Protocol::Trojan, name, "a.com", 443);
        n.password = "p".into();
        n.with_generated_id()
    }

    #[test]
    fn test_replace_keeps_order() {
        let (conn, sub) = setup();
        NodesRepo::replace(&conn, sub, &[node("b"), node("a")]).unwrap();
        NodesRepo::replace(&conn, sub, &[node("z"), node("y"), node("x")]).unwrap();

        let names: Vec<_> = NodesRepo::get_by_subscription(&conn, sub)
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["z", "y", "x"]);
        assert_eq!(NodesRepo::count(&conn).unwrap(), 3);
    }

    #[test]
    fn test_nodes_cascade_with_subscription() {
        let (conn, sub) = setup();
        NodesRepo::replace(&conn, sub, &[node("a")]).unwrap();
        SubscriptionsRepo::delete(&conn, sub).unwrap();
        assert!(NodesRepo::get_all(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_node_round_trips_through_json() {
        let (conn, sub) = setup();
        let original = node("香港 HK-01");
        NodesRepo::replace(&conn, sub, std::slice::from_ref(&original)).unwrap();
        assert_eq!(NodesRepo::get_all(&conn).unwrap(), vec![original]);
    }
}
