use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tabdeck::api::{ApiClient, AuthUser, CreateLinkRequest, EntityKind, SettingKey, Session};
use tabdeck::cache::{Cache, CacheKey, NoopStorage, SqliteStorage};
use tabdeck::config::Config;
use tabdeck::plan::{GateAction, PlanResolver};
use tabdeck::store::{
  LinksStore, SearchEngineStore, SettingsStore, UserProfile, UserStore,
};
use tabdeck::teams::TeamsService;

#[derive(Parser, Debug)]
#[command(name = "tabdeck")]
#[command(about = "Manage your new-tab dashboard from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tabdeck/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Log in and persist the session
  Login {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
  },
  /// Register a new account
  Register {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
  },
  /// Clear the session and all cached state
  Logout,
  /// Show the logged-in user
  Whoami,
  /// Manage dashboard links
  #[command(subcommand)]
  Links(LinksCommand),
  /// Manage settings toggles
  #[command(subcommand)]
  Settings(SettingsCommand),
  /// Inspect the active plan
  #[command(subcommand)]
  Plan(PlanCommand),
  /// Choose the search engine
  #[command(subcommand)]
  Engine(EngineCommand),
  /// Manage teams
  #[command(subcommand)]
  Team(TeamCommand),
  /// Manage organizations
  #[command(subcommand)]
  Org(OrgCommand),
}

#[derive(Subcommand, Debug)]
enum LinksCommand {
  /// List links, grouped by column
  List,
  /// Add a link
  Add {
    #[arg(long)]
    title: String,
    #[arg(long)]
    url: String,
    #[arg(long, default_value = "tools")]
    column: String,
    #[arg(long)]
    icon: Option<String>,
    #[arg(long)]
    description: Option<String>,
  },
  /// Delete a link by id
  Rm { id: String },
  /// Update fields of a link
  Set {
    id: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    column: Option<String>,
    #[arg(long)]
    description: Option<String>,
  },
  /// Reorder a column to match the given id order
  Reorder {
    #[arg(long)]
    column: String,
    ids: Vec<String>,
  },
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
  /// Show all toggles
  Show,
  /// Flip a toggle on or off
  Set { key: SettingKey, value: Toggle },
}

#[derive(Subcommand, Debug)]
enum PlanCommand {
  /// Show the resolved plan
  Show,
  /// Check whether an action is allowed (pin, domain, analytics, team)
  Check { action: GateAction },
  /// Confirm a pending subscription
  Confirm,
  /// Cancel the active subscription
  Cancel,
}

#[derive(Subcommand, Debug)]
enum EngineCommand {
  /// Show available engines and the current selection
  Show,
  /// Select an engine by base URL
  Set { url: String },
}

#[derive(Subcommand, Debug)]
enum TeamCommand {
  /// Create a team (you become its owner)
  Create { name: String },
  /// List your teams
  List,
  /// List members of a team
  Members { team_id: String },
  /// Add a member by email
  AddMember {
    team_id: String,
    email: String,
    #[arg(long, default_value = "member")]
    role: String,
  },
  /// Remove a member
  RmMember { team_id: String, user_id: String },
}

#[derive(Subcommand, Debug)]
enum OrgCommand {
  /// Create an organization (you become its owner)
  Create { name: String },
}

/// On/off argument for settings toggles.
#[derive(Debug, Clone, Copy)]
struct Toggle(bool);

impl std::str::FromStr for Toggle {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "on" | "true" => Ok(Toggle(true)),
      "off" | "false" => Ok(Toggle(false)),
      other => Err(eyre!("Expected on/off, got {}", other)),
    }
  }
}

/// Fully wired data layer.
struct App {
  cache: Cache,
  api: ApiClient,
  user: UserStore,
  links: LinksStore,
  settings: SettingsStore,
  engine: SearchEngineStore,
  plans: PlanResolver,
  teams: TeamsService,
}

impl App {
  fn new(config: &Config) -> Result<Self> {
    let cache = if !config.cache.enabled {
      Cache::new(NoopStorage)
    } else if let Some(path) = &config.cache.path {
      Cache::new(SqliteStorage::open_at(path)?)
    } else {
      Cache::new(SqliteStorage::open()?)
    };

    let session = Session::new(cache.clone());
    let api = ApiClient::new(config, session)?;
    let settings = SettingsStore::new(api.clone(), cache.clone());
    let links = LinksStore::new(api.clone(), cache.clone(), settings.clone());
    let user = UserStore::new(api.clone(), cache.clone(), links.clone(), settings.clone());
    let engine = SearchEngineStore::new(cache.clone());
    let plans = PlanResolver::new(api.clone());
    let teams = TeamsService::new(api.clone());

    Ok(Self {
      cache,
      api,
      user,
      links,
      settings,
      engine,
      plans,
      teams,
    })
  }

  /// Restore the logged-in identity from cache and load user data.
  async fn ensure_user(&self) -> Result<AuthUser> {
    let profile: UserProfile = self
      .cache
      .get(CacheKey::User)
      .ok_or_else(|| eyre!("Not logged in. Run `tabdeck login` first."))?;

    let auth = AuthUser {
      id: profile.user_id.ok_or_else(|| eyre!("Cached session is incomplete, log in again"))?,
      email: profile.email.ok_or_else(|| eyre!("Cached session is incomplete, log in again"))?,
    };

    self.user.fetch_user_data(&auth).await?;
    Ok(auth)
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let app = App::new(&config)?;

  match args.command {
    Command::Login { email, password } => {
      let auth = app.api.login(&email, &password).await?;
      app
        .user
        .fetch_user_data(&AuthUser {
          id: auth.user.id,
          email: auth.user.email,
        })
        .await?;
      println!("Logged in as {}", email);
    }

    Command::Register { email, password } => {
      let auth = app.api.register(&email, &password).await?;
      app.settings.create_settings().await?;
      app
        .user
        .fetch_user_data(&AuthUser {
          id: auth.user.id,
          email: auth.user.email,
        })
        .await?;
      println!("Registered {}", email);
    }

    Command::Logout => {
      app.user.clear();
      println!("Logged out");
    }

    Command::Whoami => {
      app.ensure_user().await?;
      let profile = app.user.profile();
      println!("{}", profile.email.as_deref().unwrap_or("<unknown>"));
      if let (Some(first), Some(last)) = (&profile.first_name, &profile.last_name) {
        println!("{} {}", first, last);
      }
      if let Some(plan) = &profile.plan {
        println!("plan: {} ({} pins)", plan.name, plan.max_pins);
      }
    }

    Command::Links(cmd) => {
      app.ensure_user().await?;
      app.links.fetch_links().await?;
      run_links(&app, cmd).await?;
    }

    Command::Settings(cmd) => {
      app.ensure_user().await?;
      app.settings.fetch_settings().await?;
      match cmd {
        SettingsCommand::Show => {
          let settings = app.settings.settings();
          for key in SettingKey::ALL {
            let state = if settings.get(key) { "on" } else { "off" };
            println!("{:<16} {}", key.as_str(), state);
          }
        }
        SettingsCommand::Set { key, value } => {
          app.settings.update_setting(key, value.0).await?;
          println!("{} = {}", key, if value.0 { "on" } else { "off" });
        }
      }
    }

    Command::Plan(cmd) => {
      let auth = app.ensure_user().await?;
      match cmd {
        PlanCommand::Show => {
          let plan = app.plans.resolve(&auth.id).await?;
          println!("{} (max pins: {})", plan.name, plan.max_pins);
          println!("custom domains: {}", plan.features.custom_domains);
          println!("analytics:      {}", plan.features.analytics);
          println!("team features:  {}", plan.features.team_features);
        }
        PlanCommand::Check { action } => {
          let allowed = app.plans.allows(&auth.id, action).await?;
          println!("{}: {}", action, if allowed { "allowed" } else { "not allowed" });
        }
        PlanCommand::Confirm => {
          app.api.confirm_subscription(&auth.email, &auth.id).await?;
          println!("Subscription confirmed");
        }
        PlanCommand::Cancel => {
          app.api.cancel_subscription(&auth.email, &auth.id).await?;
          println!("Subscription cancelled");
        }
      }
    }

    Command::Engine(cmd) => match cmd {
      EngineCommand::Show => {
        let selected = app.engine.selected();
        for engine in app.engine.engines() {
          let marker = if engine.url == selected { "*" } else { " " };
          println!("{} {:<12} {}", marker, engine.name, engine.url);
        }
      }
      EngineCommand::Set { url } => {
        app.engine.set_engine(&url);
        println!("Search engine set");
      }
    },

    Command::Team(cmd) => {
      app.ensure_user().await?;
      match cmd {
        TeamCommand::Create { name } => {
          let team = app.teams.create_team(&name).await?;
          println!("Created team {} ({})", team.name, team.id);
        }
        TeamCommand::List => {
          for team in app.teams.user_teams().await? {
            println!("{:<24} {}", team.id, team.name);
          }
        }
        TeamCommand::Members { team_id } => {
          for member in app.teams.team_members(&team_id).await? {
            println!("{:<24} {:<24} {}", member.user_id, member.email, member.role);
          }
        }
        TeamCommand::AddMember {
          team_id,
          email,
          role,
        } => {
          app
            .teams
            .add_member(&email, &team_id, EntityKind::Team, &role)
            .await?;
          println!("Added {} to {}", email, team_id);
        }
        TeamCommand::RmMember { team_id, user_id } => {
          app.teams.remove_member(&user_id, &team_id).await?;
          println!("Removed {} from {}", user_id, team_id);
        }
      }
    }

    Command::Org(cmd) => {
      app.ensure_user().await?;
      match cmd {
        OrgCommand::Create { name } => {
          let org = app.teams.create_organization(&name).await?;
          println!("Created organization {} ({})", org.name, org.id);
        }
      }
    }
  }

  Ok(())
}

async fn run_links(app: &App, cmd: LinksCommand) -> Result<()> {
  match cmd {
    LinksCommand::List => {
      for column in app.links.column_types() {
        match app.links.column_shortcut(&column) {
          Some(shortcut) => println!("[{}] ({})", column, shortcut),
          None => println!("[{}]", column),
        }
        for link in app.links.links_in_column(&column) {
          println!("  {:<12} {:<24} {}", link.id, link.title, link.url);
        }
      }
    }

    LinksCommand::Add {
      title,
      url,
      column,
      icon,
      description,
    } => {
      let link = app
        .links
        .create_link(CreateLinkRequest {
          title,
          url,
          icon,
          description,
          column_type: column,
        })
        .await?;
      println!("Added {} ({})", link.title, link.id);
    }

    LinksCommand::Rm { id } => {
      app.links.remove_link(&id).await?;
      println!("Removed {}", id);
    }

    LinksCommand::Set {
      id,
      title,
      url,
      column,
      description,
    } => {
      let mut link = app
        .links
        .links()
        .into_iter()
        .find(|l| l.id == id)
        .ok_or_else(|| eyre!("No link with id {}", id))?;

      if let Some(title) = title {
        link.title = title;
      }
      if let Some(url) = url {
        link.url = url;
      }
      if let Some(column) = column {
        link.column_type = column;
      }
      if let Some(description) = description {
        link.description = Some(description);
      }

      app.links.update_link(link).await?;
      println!("Updated {}", id);
    }

    LinksCommand::Reorder { column, ids } => {
      app.links.reorder_column(&column, &ids).await?;
      println!("Reordered {}", column);
    }
  }

  Ok(())
}
