//! Company database queries

use sqlx::PgPool;
use uuid::Uuid;
use anyhow::Result;

use crate::types::contact::Company;

/// Status given to companies created from imported leads
const NEW_COMPANY_STATUS: &str = "Prospect";

/// Find a company by exact (case-sensitive) name
pub async fn find_company_by_name(pool: &PgPool, name: &str) -> Result<Option<Company>> {
    let company = sqlx::query_as::<_, Company>(
        r#"
        SELECT id, name, status, created_at
        FROM companies
        WHERE name = $1
        "#
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(company)
}

/// Create a new company.
///
/// Fails with a unique-violation database error when the name is taken.
pub async fn create_company(pool: &PgPool, name: &str) -> Result<Company> {
    let company = sqlx::query_as::<_, Company>(
        r#"
        INSERT INTO companies (id, name, status, created_at, updated_at)
        VALUES ($1, $2, $3, NOW(), NOW())
        RETURNING id, name, status, created_at
        "#
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(NEW_COMPANY_STATUS)
    .fetch_one(pool)
    .await?;

    Ok(company)
}
