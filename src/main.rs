use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::env;

use academic_year_guard::{
    archive_year, get_academic_years, get_schools, init_logging, insert_academic_year,
    insert_event, insert_school, set_current_year, AcademicYear, Config, Event, GuardState,
    LoadOutcome, School, SelectionSnapshot, SqliteYearStore, YearSession,
};

const USAGE: &str = "\
Usage: academic-year-guard <command> [args]

Commands:
  init                                       Create the database
  add-school <id> <code> <name>              Register a school
  add-year <school> <name> <start> <end>     Add a year (dates YYYY-MM-DD)
  set-current <school> <year-id>             Make a year the current one
  archive <year-id>                          Archive a year
  schools                                    List schools
  years <school>                             List a school's years
  select <school> <year-id>                  Select the working year
  status <school>                            Show selection and guard state
  check-write <school>                       Exit non-zero if writes are blocked";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_logging(&config);

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    let store = SqliteYearStore::open(&config.database_path)?;

    match command.as_str() {
        "init" => {
            println!("✓ Database ready at {:?}", config.database_path);
        }
        "add-school" => {
            let [id, code, name] = expect_args::<3>(rest, "add-school <id> <code> <name>")?;
            insert_school(&store.conn(), &School::new(id, code, name))?;
            println!("✓ School {} ({}) registered", name, code);
        }
        "add-year" => {
            let [school, name, start, end] =
                expect_args::<4>(rest, "add-year <school> <name> <start> <end>")?;
            let year = AcademicYear::new(school, name, parse_date(start)?, parse_date(end)?);
            insert_academic_year(&store.conn(), &year)?;
            println!("✓ Academic year {} added: {}", year.name, year.id);
        }
        "set-current" => {
            let [school, year_id] = expect_args::<2>(rest, "set-current <school> <year-id>")?;
            set_current_year(&store.conn(), school, year_id)?;
            record(&store, &config, "current_year_changed", school, year_id)?;
            println!("✓ {} is now the current year of {}", year_id, school);
        }
        "archive" => {
            let [year_id] = expect_args::<1>(rest, "archive <year-id>")?;
            archive_year(&store.conn(), year_id)?;
            println!("🔒 Academic year {} archived", year_id);
        }
        "schools" => {
            for school in get_schools(&store.conn())? {
                println!("{:<38} {:<8} {}", school.id, school.code, school.name);
            }
        }
        "years" => {
            let [school] = expect_args::<1>(rest, "years <school>")?;
            for year in get_academic_years(&store.conn(), school)? {
                println!(
                    "{:<38} {:<12} {} → {} {}{}",
                    year.id,
                    year.name,
                    year.start_date,
                    year.end_date,
                    if year.is_current { "[current]" } else { "" },
                    if year.is_archived { "[archived]" } else { "" },
                );
            }
        }
        "select" => {
            let [school, year_id] = expect_args::<2>(rest, "select <school> <year-id>")?;
            let session = open_session(&store, school).await?;
            session
                .set_selected_year_id(year_id)
                .with_context(|| format!("Cannot select {}", year_id))?;
            record(&store, &config, "year_selected", school, year_id)?;
            print_status(&session.snapshot());
        }
        "status" => {
            let [school] = expect_args::<1>(rest, "status <school>")?;
            let session = open_session(&store, school).await?;
            print_status(&session.snapshot());
        }
        "check-write" => {
            let [school] = expect_args::<1>(rest, "check-write <school>")?;
            let session = open_session(&store, school).await?;
            if let Err(violation) = session.assert_writable() {
                let year_id = violation.year_id.clone().unwrap_or_default();
                record(&store, &config, "read_only_violation", school, &year_id)?;
                eprintln!("❌ {}", violation);
                std::process::exit(2);
            }
            println!("✅ Writes allowed");
        }
        other => {
            eprintln!("Unknown command: {}\n", other);
            println!("{}", USAGE);
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn open_session(
    store: &SqliteYearStore,
    school_id: &str,
) -> Result<YearSession<SqliteYearStore, SqliteYearStore>> {
    let session = YearSession::new(store.clone(), store.clone());

    if let LoadOutcome::Failed(failure) = session.switch_school(school_id).await {
        eprintln!("⚠️  {}", failure);
    }

    Ok(session)
}

fn print_status(snapshot: &SelectionSnapshot) {
    println!("School:        {}", snapshot.school_id.as_deref().unwrap_or("-"));
    println!("Years:         {}", snapshot.years.len());
    println!(
        "Current year:  {}",
        snapshot.current_year.as_ref().map(|y| y.name.as_str()).unwrap_or("-")
    );
    println!(
        "Selected year: {}",
        snapshot.selected_year.as_ref().map(|y| y.name.as_str()).unwrap_or("-")
    );

    let badge = match snapshot.state {
        GuardState::Active => "✅ writable",
        GuardState::Historical => "🔒 read-only",
        GuardState::Unselected => "⚪ nothing selected",
    };
    println!("Guard:         {}", badge);

    if let Some(message) = &snapshot.guard_message {
        println!("\n{}", message);
    }
    if let Some(err) = &snapshot.configuration_error {
        println!("\n⚠️  Configuration: {}", err);
    }
}

fn record(
    store: &SqliteYearStore,
    config: &Config,
    event_type: &str,
    school_id: &str,
    year_id: &str,
) -> Result<()> {
    let event = Event::new(
        event_type,
        "school",
        school_id,
        serde_json::json!({ "year_id": year_id }),
        &config.actor,
    );
    insert_event(&store.conn(), &event)
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .with_context(|| format!("Invalid date (expected YYYY-MM-DD): {}", text))
}

fn expect_args<'a, const N: usize>(args: &'a [String], usage: &str) -> Result<[&'a str; N]> {
    if args.len() != N {
        bail!("Usage: academic-year-guard {}", usage);
    }
    let mut out = [""; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = arg.as_str();
    }
    Ok(out)
}
