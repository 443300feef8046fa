//! Typed bindings for the liftlog backend API.
//!
//! Thin request/response types over [`ApiClient`]; all calls inherit the
//! transport's credential injection and failure mapping. The AI analysis
//! itself is produced server-side; the client only fetches results.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{Session, User};
use crate::transport::{ApiClient, ApiResult};

/// Session payload returned by `POST /auth/guest`.
#[derive(Debug, Clone, Deserialize)]
pub struct GuestSession {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    pub user: User,
}

impl From<&GuestSession> for Session {
    fn from(guest: &GuestSession) -> Self {
        Session {
            access_token: guest.access_token.clone(),
            refresh_token: guest.refresh_token.clone(),
            expires_in: guest.expires_in,
            token_type: guest.token_type.clone(),
        }
    }
}

/// Exercise entry within a new workout.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExerciseCreate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sets: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muscle_group: Option<String>,
}

/// Payload for creating a workout.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkoutCreate {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub exercises: Vec<ExerciseCreate>,
}

/// A stored exercise.
#[derive(Debug, Clone, Deserialize)]
pub struct Exercise {
    pub id: String,
    pub workout_id: String,
    pub name: String,
    #[serde(default)]
    pub sets: Option<u32>,
    #[serde(default)]
    pub reps: Option<u32>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub muscle_group: Option<String>,
}

/// A stored workout with its exercises.
#[derive(Debug, Clone, Deserialize)]
pub struct Workout {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub exercises: Vec<Exercise>,
}

/// Stored AI feedback for one workout.
#[derive(Debug, Clone, Deserialize)]
pub struct AiAnalysis {
    pub id: String,
    pub workout_id: String,
    pub user_id: String,
    pub summary: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub next_session_tips: Option<String>,
    pub overall_score: u8,
    pub created_at: DateTime<Utc>,
}

/// Narrative summary of the last week of training.
#[derive(Debug, Clone, Deserialize)]
pub struct WeeklySummary {
    pub narrative: String,
}

impl ApiClient {
    /// Requests a guest-scoped session from the backend.
    pub async fn guest_session(&self) -> ApiResult<GuestSession> {
        self.post_empty("/auth/guest").await
    }

    pub async fn list_workouts(&self) -> ApiResult<Vec<Workout>> {
        self.get("/workouts/").await
    }

    pub async fn create_workout(&self, workout: &WorkoutCreate) -> ApiResult<Workout> {
        self.post("/workouts/", workout).await
    }

    pub async fn get_workout(&self, workout_id: &str) -> ApiResult<Workout> {
        self.get(&format!("/workouts/{workout_id}")).await
    }

    pub async fn delete_workout(&self, workout_id: &str) -> ApiResult<()> {
        self.delete(&format!("/workouts/{workout_id}")).await
    }

    /// Triggers (re)analysis of a workout on the server.
    pub async fn analyze_workout(&self, workout_id: &str) -> ApiResult<AiAnalysis> {
        self.post_empty(&format!("/ai/analyze/{workout_id}")).await
    }

    /// Fetches the stored analysis for a workout.
    pub async fn get_analysis(&self, workout_id: &str) -> ApiResult<AiAnalysis> {
        self.get(&format!("/ai/analysis/{workout_id}")).await
    }

    pub async fn weekly_summary(&self) -> ApiResult<WeeklySummary> {
        self.get("/ai/weekly-summary").await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::identity::{IdentityProvider, OfflineProvider};

    fn client(server_uri: &str) -> ApiClient {
        let provider = Arc::new(IdentityProvider::Offline(OfflineProvider::new()));
        ApiClient::new(server_uri, provider)
    }

    /// Test: guest session payload decodes, including the nested user.
    #[tokio::test]
    async fn test_guest_session_decodes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/guest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok1",
                "expires_in": 3600,
                "refresh_token": "r1",
                "token_type": "bearer",
                "user": {"id": "guest"}
            })))
            .mount(&server)
            .await;

        let guest = client(&server.uri()).guest_session().await.unwrap();
        assert_eq!(guest.access_token, "tok1");
        assert_eq!(guest.user.id, "guest");
        assert!(guest.user.email.is_none());

        let session = Session::from(&guest);
        assert_eq!(session.access_token, "tok1");
        assert_eq!(session.expires_in, Some(3600));
    }

    /// Test: workout listing decodes dates and nested exercises.
    #[tokio::test]
    async fn test_list_workouts_decodes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/workouts/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "id": "w1",
                "user_id": "u1",
                "title": "Push day",
                "date": "2026-08-01",
                "duration_minutes": 45,
                "notes": null,
                "created_at": "2026-08-01T10:00:00Z",
                "exercises": [{
                    "id": "e1",
                    "workout_id": "w1",
                    "name": "Bench press",
                    "sets": 3,
                    "reps": 8,
                    "weight_kg": 60.0,
                    "muscle_group": "chest"
                }]
            }])))
            .mount(&server)
            .await;

        let workouts = client(&server.uri()).list_workouts().await.unwrap();
        assert_eq!(workouts.len(), 1);
        assert_eq!(workouts[0].title, "Push day");
        assert_eq!(workouts[0].exercises[0].name, "Bench press");
        assert_eq!(workouts[0].date.to_string(), "2026-08-01");
    }

    /// Test: workout creation serializes only the populated fields.
    #[tokio::test]
    async fn test_create_workout_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/workouts/"))
            .and(body_partial_json(serde_json::json!({
                "title": "Leg day",
                "exercises": [{"name": "Squat", "sets": 5}]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "w2",
                "user_id": "u1",
                "title": "Leg day",
                "date": "2026-08-02",
                "created_at": "2026-08-02T09:00:00Z",
                "exercises": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = client(&server.uri())
            .create_workout(&WorkoutCreate {
                title: "Leg day".to_string(),
                exercises: vec![ExerciseCreate {
                    name: "Squat".to_string(),
                    sets: Some(5),
                    ..ExerciseCreate::default()
                }],
                ..WorkoutCreate::default()
            })
            .await
            .unwrap();
        assert_eq!(created.id, "w2");
    }

    /// Test: analysis payload decodes score and lists.
    #[tokio::test]
    async fn test_get_analysis_decodes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ai/analysis/w1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "a1",
                "workout_id": "w1",
                "user_id": "u1",
                "summary": "Solid session",
                "strengths": ["consistency"],
                "improvements": ["more volume"],
                "next_session_tips": "add a set",
                "overall_score": 7,
                "created_at": "2026-08-01T12:00:00Z"
            })))
            .mount(&server)
            .await;

        let analysis = client(&server.uri()).get_analysis("w1").await.unwrap();
        assert_eq!(analysis.overall_score, 7);
        assert_eq!(analysis.strengths, vec!["consistency"]);
    }
}
