//! AI analysis command handlers. The analysis itself is produced
//! server-side; these only trigger and display it.

use anyhow::Result;
use liftlog_core::api::AiAnalysis;

use crate::context::AppContext;

pub async fn analyze(ctx: &AppContext, workout_id: &str) -> Result<()> {
    ctx.require_user()?;
    let analysis = ctx.api().analyze_workout(workout_id).await?;
    print_analysis(&analysis);
    Ok(())
}

pub async fn show(ctx: &AppContext, workout_id: &str) -> Result<()> {
    ctx.require_user()?;
    let analysis = ctx.api().get_analysis(workout_id).await?;
    print_analysis(&analysis);
    Ok(())
}

pub async fn weekly(ctx: &AppContext) -> Result<()> {
    ctx.require_user()?;
    let summary = ctx.api().weekly_summary().await?;
    println!("{}", summary.narrative);
    Ok(())
}

fn print_analysis(analysis: &AiAnalysis) {
    println!("{}", analysis.summary);
    println!("Score: {}/10", analysis.overall_score);
    if !analysis.strengths.is_empty() {
        println!("Strengths:");
        for item in &analysis.strengths {
            println!("  - {item}");
        }
    }
    if !analysis.improvements.is_empty() {
        println!("Improvements:");
        for item in &analysis.improvements {
            println!("  - {item}");
        }
    }
    if let Some(tips) = &analysis.next_session_tips {
        println!("Next session: {tips}");
    }
}
