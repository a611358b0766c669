use qa_error::{QaError, Result};

/// 写操作关键字：大小写不敏感的子串匹配，出现在列名或字面量里也拒绝
const MUTATION_KEYWORDS: &[&str] = &["DROP", "DELETE", "UPDATE", "INSERT"];

/// 其余危险关键字按整词匹配，`created_at` 这类列名仍可使用
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "ALTER", "CREATE", "TRUNCATE", "REPLACE", "EXEC", "EXECUTE", "UNION", "ATTACH", "DETACH",
    "PRAGMA", "GRANT", "REVOKE", "VACUUM",
];

const FORBIDDEN_TOKENS: &[&str] = &[";", "--", "/*", "*/"];

fn rejected(reason: String) -> QaError {
    QaError::UnsafeQueryRejected { reason }
}

/// 只放行单条只读 SELECT；命中即拒绝，不做改写
pub fn validate_safe_query(sql: &str) -> Result<()> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(rejected("empty statement".to_string()));
    }
    if let Some(token) = FORBIDDEN_TOKENS.iter().find(|t| sql.contains(*t)) {
        return Err(rejected(format!("forbidden token {}", token)));
    }

    let upper = sql.to_ascii_uppercase();
    if let Some(keyword) = MUTATION_KEYWORDS.iter().find(|k| upper.contains(*k)) {
        return Err(rejected(format!("forbidden keyword {}", keyword)));
    }

    let mut words = upper
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty());
    if words.next() != Some("SELECT") {
        return Err(rejected("only SELECT statements are allowed".to_string()));
    }
    if let Some(keyword) = words.find(|w| FORBIDDEN_KEYWORDS.contains(w)) {
        return Err(rejected(format!("forbidden keyword {}", keyword)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_select() {
        assert!(validate_safe_query("SELECT * FROM orders WHERE id = ?").is_ok());
        assert!(validate_safe_query("SELECT * FROM orders WHERE id = ? AND tenant_id = ?").is_ok());
        assert!(validate_safe_query("  select id, created_at from orders where id = ?").is_ok());
    }

    #[test]
    fn test_rejects_mutation_keywords_inside_words() {
        let cases = [
            "  select id, updated_at, created_at from orders where id = ?",
            "SELECT updated_at FROM orders WHERE id = ?",
            "SELECT * FROM orders WHERE note = 'dropped'",
            "SELECT * FROM orders WHERE created_by = 'inserter'",
            "select * from orders where tag = 'undeleted'",
        ];
        for sql in cases {
            let err = validate_safe_query(sql).unwrap_err();
            assert!(
                matches!(err, QaError::UnsafeQueryRejected { .. }),
                "expected rejection for {:?}",
                sql
            );
        }
    }

    #[test]
    fn test_rejects_mutations_and_separators() {
        let cases = [
            "DROP TABLE orders",
            "SELECT * FROM orders; DELETE FROM orders",
            "select * from orders where id = ? -- and tenant_id = ?",
            "update orders set status = 'paid'",
            "Insert into orders values (1)",
            "SELECT * FROM orders WHERE id = (delete from sessions)",
            "SELECT * FROM a UNION SELECT * FROM b",
            "SELECT * /* hidden */ FROM orders",
            "WITH x AS (SELECT 1) SELECT * FROM x",
            "",
        ];
        for sql in cases {
            let err = validate_safe_query(sql).unwrap_err();
            assert!(
                matches!(err, QaError::UnsafeQueryRejected { .. }),
                "expected rejection for {:?}",
                sql
            );
        }
    }
}
