use crate::api::attendance::ImportRequest;
use crate::api::backup::CreateBackupRequest;
use crate::api::salary::CalculateSalaryRequest;
use crate::lifecycle::SystemStatus;
use crate::model::attendance::AttendanceRecord;
use crate::model::backup::Backup;
use crate::model::employee::{Employee, EmployeeBrief};
use crate::model::insurance::{InsuranceGroup, InsuranceGroupInput, InsuranceItem, InsuranceItemInput};
use crate::model::position_change::{NewPositionChange, PositionChange};
use crate::model::salary_record::SalaryRecord;
use crate::services::attendance::{AttendanceData, AttendanceSummary, ImportReport};
use crate::services::employee::EmployeeInput;
use crate::services::insurance::{EmployeeInsurance, InsuranceItemAmount, InsuranceResult};
use crate::services::position::SalarySegment;
use crate::services::salary::{
    CostGroup, SalaryCostAnalysis, SalaryDetails, SalaryFailure, SalaryResult, SalaryRun,
};
use crate::utils::resource_monitor::ResourceSample;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HR Admin API",
        version = "1.0.0",
        description = r#"
## HR administration backend

Employee records, attendance import, position changes, social security and
salary computation, and database backups over a single SQLite file.

### Key Features
- **Employees**: create, update, list and delete employee profiles
- **Position changes**: record promotions; salaries are prorated by day within a month
- **Attendance**: import spreadsheet rows (JSON or CSV) with a column mapping, monthly summaries
- **Insurance**: contribution items and groups, partial-month contributions
- **Salary**: monthly calculation with attendance deductions and progressive tax, cost analysis
- **Backups**: manual and automatic snapshots, restore with a safety copy

### Response Format
Success: `{ "success": true, "data": ... }`
Failure: `{ "success": false, "error": "<readable message>" }`
"#,
    ),
    paths(
        crate::api::employee::list_employees,
        crate::api::employee::get_employee,
        crate::api::employee::create_employee,
        crate::api::employee::update_employee,
        crate::api::employee::delete_employee,

        crate::api::position_change::list_position_changes,
        crate::api::position_change::add_position_change,
        crate::api::position_change::update_position_change,
        crate::api::position_change::delete_position_change,

        crate::api::attendance::list_attendance,
        crate::api::attendance::import_attendance,
        crate::api::attendance::attendance_summary,

        crate::api::insurance::list_items,
        crate::api::insurance::create_item,
        crate::api::insurance::update_item,
        crate::api::insurance::delete_item,
        crate::api::insurance::list_groups,
        crate::api::insurance::create_group,
        crate::api::insurance::update_group,
        crate::api::insurance::delete_group,
        crate::api::insurance::calculate,

        crate::api::salary::calculate_salary,
        crate::api::salary::salary_records,
        crate::api::salary::salary_analysis,

        crate::api::backup::list_backups,
        crate::api::backup::create_backup,
        crate::api::backup::delete_backup,
        crate::api::backup::restore_backup,

        crate::api::system::system_status
    ),
    components(
        schemas(
            Employee,
            EmployeeBrief,
            EmployeeInput,
            PositionChange,
            NewPositionChange,
            AttendanceRecord,
            AttendanceData,
            AttendanceSummary,
            ImportRequest,
            ImportReport,
            InsuranceItem,
            InsuranceItemInput,
            InsuranceGroup,
            InsuranceGroupInput,
            InsuranceItemAmount,
            InsuranceResult,
            EmployeeInsurance,
            SalarySegment,
            SalaryDetails,
            SalaryResult,
            SalaryFailure,
            SalaryRun,
            SalaryRecord,
            CostGroup,
            SalaryCostAnalysis,
            CalculateSalaryRequest,
            Backup,
            CreateBackupRequest,
            ResourceSample,
            SystemStatus
        )
    ),
    tags(
        (name = "Employee", description = "Employee management APIs"),
        (name = "Position", description = "Position change APIs"),
        (name = "Attendance", description = "Attendance import and summary APIs"),
        (name = "Insurance", description = "Social security configuration and calculation APIs"),
        (name = "Salary", description = "Salary calculation and analysis APIs"),
        (name = "Backup", description = "Database backup APIs"),
        (name = "System", description = "Runtime status"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/employees/{id}",
            "/api/attendance/import",
            "/api/insurance/calculate",
            "/api/salary/analysis",
            "/api/backups/{id}/restore",
            "/api/system/status",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing");
        }
    }
}
