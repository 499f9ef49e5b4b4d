use sqlx::PgPool;

use crate::models::{Role, User};

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// メールアドレスでユーザーを検索
    ///
    /// # Note
    /// email は正規化（小文字化）済みの値を渡すこと
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT email, name, role, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
    }

    /// ロールを登録または更新
    ///
    /// 起動時のスーパーユーザー登録で使用する。
    pub async fn upsert_role(&self, email: &str, role: Role) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, role)
            VALUES ($1, $2)
            ON CONFLICT (email) DO UPDATE
            SET role = EXCLUDED.role, updated_at = NOW()
            RETURNING email, name, role, created_at, updated_at
            "#,
        )
        .bind(email)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await
    }
}
