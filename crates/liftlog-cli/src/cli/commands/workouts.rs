//! Workout command handlers.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use liftlog_core::api::{ExerciseCreate, Workout, WorkoutCreate};

use crate::context::AppContext;

pub async fn list(ctx: &AppContext) -> Result<()> {
    ctx.require_user()?;
    let workouts = ctx.api().list_workouts().await?;
    if workouts.is_empty() {
        println!("No workouts found.");
        return Ok(());
    }
    for workout in workouts {
        let duration = workout
            .duration_minutes
            .map(|m| format!("  {m} min"))
            .unwrap_or_default();
        println!(
            "{}  {}  {}{duration}",
            workout.date, workout.id, workout.title
        );
    }
    Ok(())
}

pub async fn add(
    ctx: &AppContext,
    title: String,
    date: Option<NaiveDate>,
    duration_minutes: Option<u32>,
    notes: Option<String>,
    exercise_specs: &[String],
) -> Result<()> {
    ctx.require_user()?;
    let exercises = exercise_specs
        .iter()
        .map(|spec| parse_exercise(spec))
        .collect::<Result<Vec<_>>>()?;

    let workout = ctx
        .api()
        .create_workout(&WorkoutCreate {
            title,
            date,
            duration_minutes,
            notes,
            exercises,
        })
        .await?;
    println!("Logged workout {} ({})", workout.id, workout.title);
    Ok(())
}

pub async fn show(ctx: &AppContext, id: &str) -> Result<()> {
    ctx.require_user()?;
    let workout = ctx.api().get_workout(id).await?;
    print_workout(&workout);
    Ok(())
}

pub async fn delete(ctx: &AppContext, id: &str) -> Result<()> {
    ctx.require_user()?;
    ctx.api().delete_workout(id).await?;
    println!("Deleted workout {id}");
    Ok(())
}

fn print_workout(workout: &Workout) {
    println!("{}  {}  {}", workout.date, workout.id, workout.title);
    if let Some(minutes) = workout.duration_minutes {
        println!("Duration: {minutes} min");
    }
    if let Some(notes) = &workout.notes {
        println!("Notes: {notes}");
    }
    for exercise in &workout.exercises {
        let mut detail = Vec::new();
        if let Some(sets) = exercise.sets {
            detail.push(format!("{sets} sets"));
        }
        if let Some(reps) = exercise.reps {
            detail.push(format!("{reps} reps"));
        }
        if let Some(weight) = exercise.weight_kg {
            detail.push(format!("{weight} kg"));
        }
        if detail.is_empty() {
            println!("  - {}", exercise.name);
        } else {
            println!("  - {}  ({})", exercise.name, detail.join(", "));
        }
    }
}

/// Parses an exercise spec of the form `name[:sets[:reps[:weight_kg]]]`.
fn parse_exercise(spec: &str) -> Result<ExerciseCreate> {
    let mut parts = spec.split(':');
    let name = parts.next().unwrap_or_default().trim();
    if name.is_empty() {
        anyhow::bail!("Exercise name must not be empty in '{spec}'");
    }

    let mut numeric = |field: &str| -> Result<Option<u32>> {
        parts
            .next()
            .map(|v| v.trim().parse())
            .transpose()
            .with_context(|| format!("invalid {field} in exercise '{spec}'"))
    };
    let sets = numeric("sets")?;
    let reps = numeric("reps")?;
    let weight_kg = parts
        .next()
        .map(|v| v.trim().parse())
        .transpose()
        .with_context(|| format!("invalid weight in exercise '{spec}'"))?;

    Ok(ExerciseCreate {
        name: name.to_string(),
        sets,
        reps,
        weight_kg,
        muscle_group: None,
    })
}
