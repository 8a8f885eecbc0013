use std::{fs::File, sync::Arc};

use dotenv::dotenv;
use quizbot::{
    bot::{CallbackAction, SqliteScoreStore, TelegramPresenter},
    config::Config,
    quiz::{
        Admission, AdmissionController, EndReason, Hooks, JsonCatalog, PlayerId, QueueNotify,
        QueueResolution, QuizId, StartParams, Termination, UsageStats,
    },
};
use teloxide::{prelude::*, types::ParseMode, utils::command::BotCommands, utils::html};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Everything the handlers share.
struct App {
    controller: Arc<AdmissionController>,
    catalog: Arc<JsonCatalog>,
    presenter: TelegramPresenter,
    scores: Arc<SqliteScoreStore>,
    usage: Arc<UsageStats>,
    defaults: StartParams,
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
enum Command {
    #[command(description = "show this text.")]
    Help,
    #[command(description = "list the available quizzes.")]
    Quizzes,
    #[command(description = "start the quiz with the given id.")]
    Take(u64),
    #[command(description = "see your results after the last question.")]
    Finish,
    #[command(description = "abandon your quiz or leave the queue.")]
    Leave,
    #[command(description = "your best scores.")]
    Stats,
}

#[tokio::main]
async fn main() -> HandlerResult {
    let dotenv_loaded = dotenv().is_ok();
    pretty_env_logger::init();
    if !dotenv_loaded {
        log::warn!("no .env file found, using the process environment only");
    }
    log::info!("Starting quiz bot...");

    let config = Config::from_env()?;
    let bot = Bot::from_env();

    log::info!("Loading quizzes from {}", config.catalog_path.display());
    let catalog = Arc::new(JsonCatalog::from_file(File::open(&config.catalog_path)?)?);
    log::info!("{} quizzes loaded", catalog.len());

    log::info!("Opening score database {}", config.score_db);
    let scores = Arc::new(SqliteScoreStore::open(&config.score_db).await?);

    let usage = Arc::new(UsageStats::default());
    let presenter = TelegramPresenter::new(bot.clone());
    let hooks = Hooks::new(Arc::new(presenter.clone()), scores.clone()).with_analytics(usage.clone());
    let controller = AdmissionController::new(config.admission.clone(), catalog.clone(), hooks);

    let app = Arc::new(App {
        controller: controller.clone(),
        catalog,
        presenter,
        scores,
        usage,
        defaults: config.session.clone(),
    });

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![app])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    let rejected = controller.shutdown().await;
    log::info!("Bot stopped, {} queued players turned away", rejected);
    Ok(())
}

async fn reply(bot: &Bot, msg: &Message, text: impl Into<String>) -> HandlerResult {
    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

async fn handle_command(bot: Bot, msg: Message, cmd: Command, app: Arc<App>) -> HandlerResult {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let player = PlayerId(user.id.0);

    match cmd {
        Command::Help => reply(&bot, &msg, Command::descriptions().to_string()).await?,
        Command::Quizzes => {
            let list = app
                .catalog
                .list()
                .map(|quiz| {
                    format!(
                        "<b>{}</b>. {} ({} questions, up to {} points)",
                        quiz.id,
                        html::escape(&quiz.name),
                        quiz.len(),
                        quiz.max_score()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            reply(&bot, &msg, format!("{}\n\nStart one with /take &lt;id&gt;", list)).await?;
        }
        Command::Take(id) => {
            if !msg.chat.is_private() {
                reply(&bot, &msg, "Quizzes can only be taken in a private chat with me.").await?;
                return Ok(());
            }
            let params = app.defaults.clone().with_display_name(user.full_name());
            let presenter = app.presenter.clone();
            let notify: QueueNotify = Box::new(move |resolution| {
                let text = match resolution {
                    QueueResolution::Admitted(session) => format!(
                        "A slot is free! Starting <b>{}</b>.",
                        html::escape(&session.quiz().name)
                    ),
                    QueueResolution::Rejected(reason) => reason.to_string(),
                };
                if let Err(err) = presenter.say(player, text) {
                    log::warn!("player {}: queue notification failed: {}", player, err);
                }
            });

            match app
                .controller
                .request_start(player, QuizId(id), params, notify)
                .await
            {
                // The first question is already on its way.
                Ok(Admission::Accepted(_)) => {}
                Ok(Admission::Rejected(reason)) => reply(&bot, &msg, reason.to_string()).await?,
                Ok(Admission::Queued(ticket)) => {
                    let position = app.controller.queue_position(ticket).await.unwrap_or(1);
                    reply(
                        &bot,
                        &msg,
                        format!(
                            "All quiz slots are busy. You are number {} in line (ticket {}). \
                             I will start your quiz as soon as a slot frees up, or use /leave.",
                            position, ticket
                        ),
                    )
                    .await?;
                }
                Err(err) => {
                    log::info!("player {}: {}", player, err);
                    reply(&bot, &msg, format!("Quiz {} does not exist. See /quizzes.", id)).await?;
                }
            }
        }
        Command::Finish => match app.controller.active_session(player).await {
            None => reply(&bot, &msg, "You have no active quiz.").await?,
            Some(session) => match session.finish().await {
                Ok(Termination::Ignored) => {
                    reply(&bot, &msg, "Answer the remaining questions first.").await?
                }
                Ok(_) => {}
                Err(err) => {
                    log::error!("{}", err);
                    reply(&bot, &msg, "Your quiz ended but the score could not be saved.").await?;
                }
            },
        },
        Command::Leave => {
            if let Some(ticket) = app.controller.queued_ticket(player).await {
                if app.controller.cancel_queued(ticket).await {
                    reply(&bot, &msg, "You left the queue.").await?;
                    return Ok(());
                }
            }
            match app.controller.active_session(player).await {
                None => reply(&bot, &msg, "You have no active quiz.").await?,
                Some(session) => {
                    if let Err(err) = session.terminate(EndReason::Aborted).await {
                        log::error!("{}", err);
                    }
                }
            }
        }
        Command::Stats => {
            let card = app.scores.card(player).await?;
            let mut lines = vec![format!("<b>Your results</b>, total {} points", card.total())];
            for (quiz, best) in card.bests() {
                let name = app
                    .catalog
                    .list()
                    .find(|q| q.id == quiz)
                    .map(|q| html::escape(&q.name))
                    .unwrap_or_else(|| format!("Quiz {}", quiz));
                lines.push(format!("{}: best {}", name, best));
            }
            let usage = app.usage.snapshot();
            let ledger = app.controller.snapshot().await;
            lines.push(format!(
                "\n{} quizzes running, {} waiting. {} sessions since start, {:.0}% of answers correct.",
                ledger.active,
                ledger.queued,
                usage.sessions_started,
                usage.accuracy()
            ));
            reply(&bot, &msg, lines.join("\n")).await?;
        }
    }
    Ok(())
}

async fn handle_callback(bot: Bot, q: CallbackQuery, app: Arc<App>) -> HandlerResult {
    let player = PlayerId(q.from.id.0);
    let Some(action) = q.data.as_deref().and_then(CallbackAction::parse) else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };

    let session = app
        .controller
        .active_session(player)
        .await
        .filter(|s| s.tag() == action.tag());
    let Some(session) = session else {
        bot.answer_callback_query(q.id)
            .text("This quiz is no longer active.")
            .await?;
        return Ok(());
    };

    let text = match action {
        CallbackAction::Answer { step, key, .. } => match session.submit_answer(step, &key).await {
            Some(record) => {
                if let Some(message) = &q.message {
                    if let Err(err) = bot
                        .edit_message_reply_markup(message.chat.id, message.id)
                        .await
                    {
                        log::debug!("could not clear answer buttons: {}", err);
                    }
                }
                if record.correct {
                    format!("Correct! +{}", record.points)
                } else {
                    "Incorrect!".to_string()
                }
            }
            None => "Too late for that question.".to_string(),
        },
        CallbackAction::Finish { .. } => match session.finish().await {
            Ok(Termination::Ignored) => "Answer the remaining questions first.".to_string(),
            Ok(_) => "Quiz finished!".to_string(),
            Err(err) => {
                log::error!("{}", err);
                "Your score could not be saved.".to_string()
            }
        },
    };

    bot.answer_callback_query(q.id).text(text).await?;
    Ok(())
}
