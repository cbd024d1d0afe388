use serde_json::json;

use super::{Book, NewBook};
use crate::context::Context;
use crate::database::{Database, DbError};

const TABLE: &str = "books";

/// Book persistence. Every method builds its own interceptor chain.
pub struct Store {
    db: Database,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn query_by_id(&self, ctx: &Context, id: i64) -> Result<Book, DbError> {
        const Q: &str = "select * from books where id = $1";
        self.db.call(TABLE, "QueryByID").query_row_as(ctx, Q, vec![json!(id)]).await
    }

    /// One page of books, skipping the first `offset` rows.
    pub async fn query(&self, ctx: &Context, offset: i64, rows_per_page: i64) -> Result<Vec<Book>, DbError> {
        const Q: &str = "select * from books order by id offset $1 rows fetch next $2 rows only";
        self.db
            .call(TABLE, "Query")
            .query_as(ctx, Q, vec![json!(offset), json!(rows_per_page)])
            .await
    }

    pub async fn create(&self, ctx: &Context, book: &NewBook) -> Result<Book, DbError> {
        const Q: &str = "insert into books (isbn, title, author, publication_year, publisher) \
                         values ($1, $2, $3, $4, $5) returning *";
        self.db
            .call(TABLE, "Create")
            .query_row_as(
                ctx,
                Q,
                vec![
                    json!(book.isbn.trim()),
                    json!(book.title.trim()),
                    json!(book.author),
                    json!(book.publication_year),
                    json!(book.publisher),
                ],
            )
            .await
    }
}
