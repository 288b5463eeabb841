// Notification domain types
//
// A Notification belongs to exactly one recipient and is always persisted
// before it is pushed live. `is_read` only ever moves false -> true.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Closed set of notification types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Welcome,
    JobMatch,
    ApplicationUpdate,
    ApplicationReceived,
    InterviewScheduled,
    JobRecommendation,
    ProfileIncomplete,
    JobExpired,
    DashboardUpdate,
    CompanyVerified,
    AdminAction,
    SystemAnnouncement,
    SystemMaintenance,
    AnalyticsReady,
    JobAlertMatch,
    MessageReceived,
    ResumeViewed,
    ResumeUploaded,
    JobPosted,
    OtpSent,
    OtpVerified,
    OtpFailed,
    OtpExpired,
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "WELCOME",
            Self::JobMatch => "JOB_MATCH",
            Self::ApplicationUpdate => "APPLICATION_UPDATE",
            Self::ApplicationReceived => "APPLICATION_RECEIVED",
            Self::InterviewScheduled => "INTERVIEW_SCHEDULED",
            Self::JobRecommendation => "JOB_RECOMMENDATION",
            Self::ProfileIncomplete => "PROFILE_INCOMPLETE",
            Self::JobExpired => "JOB_EXPIRED",
            Self::DashboardUpdate => "DASHBOARD_UPDATE",
            Self::CompanyVerified => "COMPANY_VERIFIED",
            Self::AdminAction => "ADMIN_ACTION",
            Self::SystemAnnouncement => "SYSTEM_ANNOUNCEMENT",
            Self::SystemMaintenance => "SYSTEM_MAINTENANCE",
            Self::AnalyticsReady => "ANALYTICS_READY",
            Self::JobAlertMatch => "JOB_ALERT_MATCH",
            Self::MessageReceived => "MESSAGE_RECEIVED",
            Self::ResumeViewed => "RESUME_VIEWED",
            Self::ResumeUploaded => "RESUME_UPLOADED",
            Self::JobPosted => "JOB_POSTED",
            Self::OtpSent => "OTP_SENT",
            Self::OtpVerified => "OTP_VERIFIED",
            Self::OtpFailed => "OTP_FAILED",
            Self::OtpExpired => "OTP_EXPIRED",
            Self::System => "SYSTEM",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| format!("unknown notification type: {}", s))
    }
}

/// A persisted notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub data: Option<Value>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Content of a notification before a recipient is attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationInput {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Row to insert into the notification store
#[derive(Debug, Clone, PartialEq)]
pub struct CreateNotification {
    pub user_id: String,
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub data: Option<Value>,
}

impl CreateNotification {
    pub fn new(user_id: impl Into<String>, input: &NotificationInput) -> Self {
        Self {
            user_id: user_id.into(),
            kind: input.kind,
            title: input.title.clone(),
            message: input.message.clone(),
            data: input.data.clone(),
        }
    }
}

/// Read/unread breakdown for one notification type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadCounts {
    pub read: u64,
    pub unread: u64,
}

pub type NotificationStats = BTreeMap<NotificationType, ReadCounts>;

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// Templates
// ============================================================================

impl NotificationInput {
    pub fn new(kind: NotificationType, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    // Jobseeker

    pub fn application_submitted(job_title: &str, company: &str) -> Self {
        Self::new(
            NotificationType::ApplicationUpdate,
            "Application Submitted Successfully!",
            format!(
                "Your application for \"{}\" at {} has been submitted successfully.",
                job_title, company
            ),
        )
        .with_data(json!({
            "jobTitle": job_title,
            "companyName": company,
            "actionUrl": "/dashboard/jobseeker/applications",
        }))
    }

    pub fn application_status_changed(job_title: &str, company: &str, status: &str) -> Self {
        let lead = match status {
            "reviewed" => "Your application is being reviewed",
            "shortlisted" => "Congratulations! You have been shortlisted",
            "rejected" => "Unfortunately, your application was not selected",
            "accepted" => "Congratulations! Your application has been accepted",
            _ => "Your application status changed",
        };
        Self::new(
            NotificationType::ApplicationUpdate,
            format!("Application {}", capitalize(status)),
            format!("{} for \"{}\" at {}.", lead, job_title, company),
        )
        .with_data(json!({
            "jobTitle": job_title,
            "companyName": company,
            "status": status,
            "actionUrl": "/dashboard/jobseeker/applications",
        }))
    }

    pub fn interview_scheduled(job_title: &str, company: &str, interview_date: &str) -> Self {
        Self::new(
            NotificationType::InterviewScheduled,
            "Interview Scheduled!",
            format!(
                "Your interview for \"{}\" at {} is scheduled for {}.",
                job_title, company, interview_date
            ),
        )
        .with_data(json!({
            "jobTitle": job_title,
            "companyName": company,
            "interviewDate": interview_date,
            "actionUrl": "/dashboard/jobseeker/applications",
        }))
    }

    pub fn job_match(job_title: &str, company: &str, match_score: u8) -> Self {
        Self::new(
            NotificationType::JobRecommendation,
            "New Job Match!",
            format!(
                "We found a {}% match: \"{}\" at {}",
                match_score, job_title, company
            ),
        )
        .with_data(json!({
            "jobTitle": job_title,
            "companyName": company,
            "matchScore": match_score,
            "actionUrl": "/jobs",
        }))
    }

    pub fn profile_incomplete(missing_fields: &[&str]) -> Self {
        Self::new(
            NotificationType::ProfileIncomplete,
            "Complete Your Profile",
            format!(
                "Complete your profile by adding: {} to get better job matches.",
                missing_fields.join(", ")
            ),
        )
        .with_data(json!({
            "missingFields": missing_fields,
            "actionUrl": "/dashboard/jobseeker/profile",
        }))
    }

    // Employer

    pub fn application_received(applicant_name: &str, job_title: &str, application_id: &str) -> Self {
        Self::new(
            NotificationType::ApplicationReceived,
            "New Job Application!",
            format!(
                "{} applied for \"{}\". Review their application now.",
                applicant_name, job_title
            ),
        )
        .with_data(json!({
            "applicantName": applicant_name,
            "jobTitle": job_title,
            "applicationId": application_id,
            "actionUrl": format!("/employer/applications/{}", application_id),
        }))
    }

    pub fn job_expiring(job_title: &str, days_left: u32) -> Self {
        Self::new(
            NotificationType::JobExpired,
            "Job Posting Expiring Soon",
            format!(
                "Your job posting \"{}\" expires in {} days. Consider extending it.",
                job_title, days_left
            ),
        )
        .with_data(json!({
            "jobTitle": job_title,
            "daysLeft": days_left,
            "actionUrl": "/employer/jobs",
        }))
    }

    pub fn job_performance(job_title: &str, views: u64, applications: u64) -> Self {
        Self::new(
            NotificationType::DashboardUpdate,
            "Job Performance Update",
            format!(
                "\"{}\" has {} views and {} applications this week.",
                job_title, views, applications
            ),
        )
        .with_data(json!({
            "jobTitle": job_title,
            "views": views,
            "applications": applications,
            "actionUrl": "/employer/analytics",
        }))
    }

    pub fn company_verification(approved: bool) -> Self {
        let (status, message) = if approved {
            ("approved", "Your company has been verified and approved!")
        } else {
            (
                "rejected",
                "Your company verification was rejected. Please review and resubmit.",
            )
        };
        Self::new(
            NotificationType::CompanyVerified,
            format!("Company {}", capitalize(status)),
            message,
        )
        .with_data(json!({ "status": status, "actionUrl": "/employer/company/profile" }))
    }

    // Admin and broadcast

    pub fn company_registered(company_name: &str, company_id: &str) -> Self {
        Self::new(
            NotificationType::AdminAction,
            "New Company Registration",
            format!("\"{}\" has registered and needs verification.", company_name),
        )
        .with_data(json!({
            "companyName": company_name,
            "companyId": company_id,
            "actionUrl": "/admin/companies",
        }))
    }

    pub fn system_alert(alert_type: &str, message: &str) -> Self {
        Self::new(
            NotificationType::SystemAnnouncement,
            format!("System Alert: {}", alert_type),
            message,
        )
        .with_data(json!({ "alertType": alert_type }))
    }

    pub fn job_alert(job_title: &str, location: &str, job_type: &str) -> Self {
        Self::new(
            NotificationType::JobAlertMatch,
            "New Job Alert Match!",
            format!("New {} position: \"{}\" in {}", job_type, job_title, location),
        )
        .with_data(json!({ "jobTitle": job_title, "location": location, "jobType": job_type }))
    }

    pub fn system_maintenance(message: &str, scheduled_time: &str) -> Self {
        Self::new(
            NotificationType::SystemMaintenance,
            "Scheduled Maintenance",
            format!(
                "System maintenance scheduled for {}. {}",
                scheduled_time, message
            ),
        )
        .with_data(json!({ "scheduledTime": scheduled_time }))
    }

    // Account

    pub fn otp_verified(phone_number: &str, otp_id: &str) -> Self {
        let masked = mask_phone_number(phone_number);
        Self::new(
            NotificationType::OtpVerified,
            "Phone Verified",
            format!("Your phone number {} has been verified successfully", masked),
        )
        .with_data(json!({
            "phoneNumber": masked,
            "otpId": otp_id,
            "verifiedAt": Utc::now(),
        }))
    }
}

/// Keep the last four digits, star out the rest. Short numbers pass through.
pub fn mask_phone_number(phone_number: &str) -> String {
    let digits: Vec<char> = phone_number.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 10 {
        return phone_number.to_string();
    }
    let split = digits.len() - 4;
    let mut masked = String::with_capacity(digits.len() + 1);
    masked.push('+');
    masked.extend(std::iter::repeat('*').take(split));
    masked.extend(&digits[split..]);
    masked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_round_trips_through_str() {
        assert_eq!(NotificationType::OtpVerified.as_str(), "OTP_VERIFIED");
        assert_eq!(
            "APPLICATION_RECEIVED".parse::<NotificationType>().unwrap(),
            NotificationType::ApplicationReceived
        );
        assert!("NOPE".parse::<NotificationType>().is_err());
        assert_eq!(
            serde_json::to_value(NotificationType::SystemAnnouncement).unwrap(),
            serde_json::json!("SYSTEM_ANNOUNCEMENT")
        );
    }

    #[test]
    fn test_application_received_template() {
        let input = NotificationInput::application_received("Ada Lovelace", "Backend Engineer", "app-1");
        assert_eq!(input.kind, NotificationType::ApplicationReceived);
        assert_eq!(
            input.message,
            "Ada Lovelace applied for \"Backend Engineer\". Review their application now."
        );
        let data = input.data.unwrap();
        assert_eq!(data["jobTitle"], "Backend Engineer");
        assert_eq!(data["actionUrl"], "/employer/applications/app-1");
    }

    #[test]
    fn test_status_change_title_is_capitalized() {
        let input = NotificationInput::application_status_changed("SRE", "Acme", "shortlisted");
        assert_eq!(input.title, "Application Shortlisted");
        assert!(input.message.starts_with("Congratulations! You have been shortlisted"));
    }

    #[test]
    fn test_notification_serializes_type_field() {
        let input = NotificationInput::new(NotificationType::System, "t", "m");
        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(value["type"], "SYSTEM");
    }

    #[test]
    fn test_mask_phone_number() {
        assert_eq!(mask_phone_number("+1 (555) 123-4567"), "+*******4567");
        assert_eq!(mask_phone_number("12345"), "12345");
        let input = NotificationInput::otp_verified("5551234567", "otp-1");
        assert_eq!(input.kind, NotificationType::OtpVerified);
        assert!(input.message.contains("+******4567"));
    }
}
