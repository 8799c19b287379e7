use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use koperasi_core::domain::membership::{EmployeeDetails, MemberApplication, MemberApplicationId};
use koperasi_core::domain::user::{EmployeeType, UserId};
use koperasi_core::pagination::PageRequest;
use koperasi_core::workflow::ApplicationStatus;

use super::{
    column, current_step, fetch_page, parsed, status, timestamp, ApplicationFilter,
    RepositoryError,
};

const APPLICATION_COLUMNS: &str = "id, user_id, employee_number, full_name, department_id, \
                                   golongan_id, employee_type, phone, bank_account_number, \
                                   status, current_step, created_at, updated_at";

pub async fn save(
    conn: &mut SqliteConnection,
    application: &MemberApplication,
) -> Result<(), RepositoryError> {
    let employee = &application.employee;
    sqlx::query(
        r#"
        INSERT INTO member_application (
            id, user_id, employee_number, full_name, department_id, golongan_id,
            employee_type, phone, bank_account_number, status, current_step,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            employee_number = excluded.employee_number,
            full_name = excluded.full_name,
            department_id = excluded.department_id,
            golongan_id = excluded.golongan_id,
            employee_type = excluded.employee_type,
            phone = excluded.phone,
            bank_account_number = excluded.bank_account_number,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&application.id.0)
    .bind(&application.user_id.0)
    .bind(employee.employee_number.trim())
    .bind(employee.full_name.trim())
    .bind(&employee.department_id)
    .bind(&employee.golongan_id)
    .bind(employee.employee_type.as_str())
    .bind(employee.phone.trim())
    .bind(employee.bank_account_number.trim())
    .bind(application.status.to_string())
    .bind(application.current_step.map(|step| step.as_str()))
    .bind(application.created_at.to_rfc3339())
    .bind(application.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn find(
    conn: &mut SqliteConnection,
    id: &MemberApplicationId,
) -> Result<Option<MemberApplication>, RepositoryError> {
    let sql = format!("SELECT {APPLICATION_COLUMNS} FROM member_application WHERE id = ?");
    let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&mut *conn).await?;
    row.map(|value| application_from_row(&value)).transpose()
}

pub async fn list(
    conn: &mut SqliteConnection,
    filter: &ApplicationFilter,
    page: &PageRequest,
) -> Result<(Vec<MemberApplication>, u64), RepositoryError> {
    let (rows, total) =
        fetch_page(conn, "member_application", APPLICATION_COLUMNS, filter, page).await?;
    let applications = rows.iter().map(application_from_row).collect::<Result<Vec<_>, _>>()?;
    Ok((applications, total))
}

/// Whether the user already has an application that is neither rejected nor
/// cancelled.
pub async fn has_live_application(
    conn: &mut SqliteConnection,
    user_id: &UserId,
) -> Result<bool, RepositoryError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM member_application WHERE user_id = ? AND status NOT IN (?, ?)",
    )
    .bind(&user_id.0)
    .bind(ApplicationStatus::Rejected.to_string())
    .bind(ApplicationStatus::Cancelled.to_string())
    .fetch_one(&mut *conn)
    .await?;
    Ok(count > 0)
}

fn application_from_row(row: &SqliteRow) -> Result<MemberApplication, RepositoryError> {
    Ok(MemberApplication {
        id: MemberApplicationId(column(row, "id")?),
        user_id: UserId(column(row, "user_id")?),
        employee: EmployeeDetails {
            employee_number: column(row, "employee_number")?,
            full_name: column(row, "full_name")?,
            department_id: column(row, "department_id")?,
            golongan_id: column(row, "golongan_id")?,
            employee_type: parsed(row, "employee_type", EmployeeType::parse)?,
            phone: column(row, "phone")?,
            bank_account_number: column(row, "bank_account_number")?,
        },
        status: status(row)?,
        current_step: current_step(row)?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use koperasi_core::domain::membership::{EmployeeDetails, MemberApplication, MemberApplicationId};
    use koperasi_core::domain::user::{EmployeeType, UserId};
    use koperasi_core::workflow::{ApplicationStatus, WorkflowKind};

    use super::{find, has_live_application, save};
    use crate::repositories::test_support::{insert_user, setup};
    use crate::repositories::workflow;

    #[tokio::test]
    async fn rejected_applications_do_not_block_reapplying() {
        let pool = setup().await;
        insert_user(&pool, "u-1", &["EMPLOYEE"]).await;
        sqlx::query(
            "INSERT INTO department (id, name, created_at) VALUES ('d-1', 'Produksi', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("department");
        sqlx::query(
            "INSERT INTO golongan (id, name, max_loan_amount, created_at)
             VALUES ('g-2', 'II', '25000000', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("golongan");

        let mut conn = pool.acquire().await.expect("conn");
        let now = Utc::now();
        let application = MemberApplication {
            id: MemberApplicationId("ma-1".to_string()),
            user_id: UserId("u-1".to_string()),
            employee: EmployeeDetails {
                employee_number: "EMP-042".to_string(),
                full_name: "Budi Santoso".to_string(),
                department_id: "d-1".to_string(),
                golongan_id: "g-2".to_string(),
                employee_type: EmployeeType::Contract,
                phone: "0812000111".to_string(),
                bank_account_number: "99887766".to_string(),
            },
            status: ApplicationStatus::Draft,
            current_step: None,
            created_at: now,
            updated_at: now,
        };
        save(&mut conn, &application).await.expect("save");
        let user = UserId("u-1".to_string());
        assert!(has_live_application(&mut conn, &user).await.expect("live"));

        workflow::set_status(&mut conn, WorkflowKind::MemberApplication, "ma-1", ApplicationStatus::Rejected, now)
            .await
            .expect("reject");
        assert!(!has_live_application(&mut conn, &user).await.expect("live"));

        let stored = find(&mut conn, &application.id).await.expect("find").expect("exists");
        assert_eq!(stored.employee.employee_type, EmployeeType::Contract);
    }
}
