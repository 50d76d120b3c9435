//! Reflexion lessons: `lessons`, `learn`.

use anyhow::Result;
use console::style;
use waypoint::config::WaypointConfig;
use waypoint::reflexion::NewLesson;
use waypoint::workspace::Workspace;

use super::parse_json;

pub fn cmd_lessons(config: WaypointConfig, tags: &[String]) -> Result<()> {
    let workspace = Workspace::open(config)?;
    let index = workspace.load_lessons()?;
    let lessons = index.search(tags);
    if lessons.is_empty() {
        println!("No lessons found");
        return Ok(());
    }
    for lesson in lessons {
        let tags: Vec<&str> = lesson.tags.iter().map(String::as_str).collect();
        println!(
            "{} [{}] {}",
            style(&lesson.id).bold(),
            lesson.severity,
            style(tags.join(", ")).dim()
        );
        println!("  What happened: {}", lesson.what_happened);
        println!("  Lesson: {}", lesson.lesson);
    }
    Ok(())
}

pub fn cmd_learn(config: WaypointConfig, input: &str) -> Result<()> {
    let lesson: NewLesson = parse_json(input, "expected a lesson JSON object")?;
    let workspace = Workspace::open_locked(config)?;
    let mut index = workspace.load_lessons()?;
    let id = index.add(lesson).id.clone();
    workspace.save_lessons(&index)?;
    println!("Recorded lesson {}", id);
    Ok(())
}
