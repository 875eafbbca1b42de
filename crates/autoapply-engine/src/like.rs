use sea_orm::sea_query::{Expr, Func, IntoColumnRef, LikeExpr, SimpleExpr};

const ESCAPE: char = '\\';

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | ESCAPE) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

/// `lower(col) LIKE '%term%'`, with the user's term matched literally.
///
/// The term is folded with full Unicode rules, the column by the backend's
/// `lower()`. Postgres folds non-ASCII letters too; SQLite's built-in
/// `lower()` is ASCII-only, so there "über" does not find "ÜBER".
pub(crate) fn contains_ci(column: impl IntoColumnRef, term: &str) -> SimpleExpr {
    let pattern = format!("%{}%", escape_like(&term.to_lowercase()));
    Expr::expr(Func::lower(Expr::col(column))).like(LikeExpr::new(pattern).escape(ESCAPE))
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn escapes_metacharacters() {
        assert_eq!(escape_like("100%_remote\\"), "100\\%\\_remote\\\\");
        assert_eq!(escape_like("react"), "react");
    }
}
