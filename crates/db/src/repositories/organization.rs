use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use koperasi_core::domain::user::{Department, Employee, EmployeeType, Golongan, Level, Role};
use koperasi_core::pagination::PageRequest;

use super::{
    column, decimal, fetch_page, flag, parsed, timestamp, ApplicationFilter, RepositoryError,
};
use crate::DbPool;

const EMPLOYEE_COLUMNS: &str = "id, employee_number, full_name, department_id, golongan_id, \
                                employee_type, phone, bank_account_number, is_active, \
                                created_at, updated_at";

/// Departments, golongan (pay grades), employees and the level catalog.
#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    async fn list_departments(&self) -> Result<Vec<Department>, RepositoryError>;
    async fn find_department(&self, id: &str) -> Result<Option<Department>, RepositoryError>;
    async fn save_department(&self, department: &Department) -> Result<(), RepositoryError>;
    async fn delete_department(&self, id: &str) -> Result<bool, RepositoryError>;

    async fn list_golongan(&self) -> Result<Vec<Golongan>, RepositoryError>;
    async fn find_golongan(&self, id: &str) -> Result<Option<Golongan>, RepositoryError>;
    async fn save_golongan(&self, golongan: &Golongan) -> Result<(), RepositoryError>;
    async fn delete_golongan(&self, id: &str) -> Result<bool, RepositoryError>;

    async fn list_employees(
        &self,
        page: &PageRequest,
    ) -> Result<(Vec<Employee>, u64), RepositoryError>;
    async fn find_employee(&self, id: &str) -> Result<Option<Employee>, RepositoryError>;
    async fn save_employee(&self, employee: &Employee) -> Result<(), RepositoryError>;

    async fn list_levels(&self) -> Result<Vec<Level>, RepositoryError>;
}

pub struct SqlOrganizationRepository {
    pool: DbPool,
}

impl SqlOrganizationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationRepository for SqlOrganizationRepository {
    async fn list_departments(&self) -> Result<Vec<Department>, RepositoryError> {
        let rows = sqlx::query("SELECT id, name, created_at FROM department ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(department_from_row).collect()
    }

    async fn find_department(&self, id: &str) -> Result<Option<Department>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, created_at FROM department WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|value| department_from_row(&value)).transpose()
    }

    async fn save_department(&self, department: &Department) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO department (id, name, created_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(&department.id)
        .bind(department.name.trim())
        .bind(department.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_department(&self, id: &str) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM department WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_golongan(&self) -> Result<Vec<Golongan>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, description, max_loan_amount, created_at FROM golongan ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(golongan_from_row).collect()
    }

    async fn find_golongan(&self, id: &str) -> Result<Option<Golongan>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        find_golongan(&mut conn, id).await
    }

    async fn save_golongan(&self, golongan: &Golongan) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO golongan (id, name, description, max_loan_amount, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                max_loan_amount = excluded.max_loan_amount
            "#,
        )
        .bind(&golongan.id)
        .bind(golongan.name.trim())
        .bind(golongan.description.as_deref())
        .bind(golongan.max_loan_amount.to_string())
        .bind(golongan.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_golongan(&self, id: &str) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM golongan WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_employees(
        &self,
        page: &PageRequest,
    ) -> Result<(Vec<Employee>, u64), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let (rows, total) =
            fetch_page(&mut conn, "employee", EMPLOYEE_COLUMNS, &ApplicationFilter::default(), page)
                .await?;
        let employees = rows.iter().map(employee_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok((employees, total))
    }

    async fn find_employee(&self, id: &str) -> Result<Option<Employee>, RepositoryError> {
        let sql = format!("SELECT {EMPLOYEE_COLUMNS} FROM employee WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(|value| employee_from_row(&value)).transpose()
    }

    async fn save_employee(&self, employee: &Employee) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        save_employee(&mut conn, employee).await
    }

    async fn list_levels(&self) -> Result<Vec<Level>, RepositoryError> {
        let rows = sqlx::query("SELECT role, description FROM level").fetch_all(&self.pool).await?;
        let mut levels = rows.iter().map(level_from_row).collect::<Result<Vec<_>, _>>()?;
        levels.sort_by_key(|level| level.role);
        Ok(levels)
    }
}

pub async fn find_golongan(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Golongan>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, name, description, max_loan_amount, created_at FROM golongan WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|value| golongan_from_row(&value)).transpose()
}

pub async fn find_employee_by_number(
    conn: &mut SqliteConnection,
    employee_number: &str,
) -> Result<Option<Employee>, RepositoryError> {
    let sql = format!("SELECT {EMPLOYEE_COLUMNS} FROM employee WHERE employee_number = ?");
    let row = sqlx::query(&sql).bind(employee_number.trim()).fetch_optional(&mut *conn).await?;
    row.map(|value| employee_from_row(&value)).transpose()
}

/// Upsert keyed by id; the employee number stays unique across rows.
pub async fn save_employee(
    conn: &mut SqliteConnection,
    employee: &Employee,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO employee (
            id, employee_number, full_name, department_id, golongan_id, employee_type,
            phone, bank_account_number, is_active, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            employee_number = excluded.employee_number,
            full_name = excluded.full_name,
            department_id = excluded.department_id,
            golongan_id = excluded.golongan_id,
            employee_type = excluded.employee_type,
            phone = excluded.phone,
            bank_account_number = excluded.bank_account_number,
            is_active = excluded.is_active,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&employee.id)
    .bind(employee.employee_number.trim())
    .bind(employee.full_name.trim())
    .bind(&employee.department_id)
    .bind(&employee.golongan_id)
    .bind(employee.employee_type.as_str())
    .bind(employee.phone.as_deref())
    .bind(employee.bank_account_number.as_deref())
    .bind(i64::from(employee.is_active))
    .bind(employee.created_at.to_rfc3339())
    .bind(employee.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Loan ceiling of the golongan attached to the user's employee record.
pub async fn loan_ceiling_for_user(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Option<rust_decimal::Decimal>, RepositoryError> {
    let row = sqlx::query(
        r#"
        SELECT g.max_loan_amount
        FROM app_user u
        JOIN employee e ON e.id = u.employee_id
        JOIN golongan g ON g.id = e.golongan_id
        WHERE u.id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|value| decimal(&value, "max_loan_amount")).transpose()
}

fn department_from_row(row: &SqliteRow) -> Result<Department, RepositoryError> {
    Ok(Department {
        id: column(row, "id")?,
        name: column(row, "name")?,
        created_at: timestamp(row, "created_at")?,
    })
}

fn golongan_from_row(row: &SqliteRow) -> Result<Golongan, RepositoryError> {
    Ok(Golongan {
        id: column(row, "id")?,
        name: column(row, "name")?,
        description: column(row, "description")?,
        max_loan_amount: decimal(row, "max_loan_amount")?,
        created_at: timestamp(row, "created_at")?,
    })
}

fn level_from_row(row: &SqliteRow) -> Result<Level, RepositoryError> {
    Ok(Level {
        role: parsed(row, "role", Role::parse)?,
        description: column(row, "description")?,
    })
}

fn employee_from_row(row: &SqliteRow) -> Result<Employee, RepositoryError> {
    Ok(Employee {
        id: column(row, "id")?,
        employee_number: column(row, "employee_number")?,
        full_name: column(row, "full_name")?,
        department_id: column(row, "department_id")?,
        golongan_id: column(row, "golongan_id")?,
        employee_type: parsed(row, "employee_type", EmployeeType::parse)?,
        phone: column(row, "phone")?,
        bank_account_number: column(row, "bank_account_number")?,
        is_active: flag(row, "is_active")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}
