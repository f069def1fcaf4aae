use std::path::Path;
use std::sync::Arc;
use libcirc::{BookId, Library, LibraryConfig, MemoryStore, NewBook, ReaderId, SystemClock};

pub enum Command {
    AddBook { title: String, author: Option<String>, copies: u32, categories: Vec<String> },
    AddReader { name: String },
    Borrow { reader: ReaderId, book: BookId },
    Return { reader: ReaderId, book: BookId },
    Evaluate { reader: ReaderId },
    Recommend { reader: ReaderId },
    Profile { reader: ReaderId },
    List,
    Search { query: String },
    Popular { limit: usize },
}

const COMMANDS: &str = "add-book, add-reader, borrow, return, evaluate, recommend, profile, list, search, popular";

/// Parse a command from a provided argument vector
/// args[0] is the command name
pub fn parse_command_from_args(args: &[String]) -> Result<Command, String> {
    let Some(command) = args.first() else {
        return Err(format!("No command provided. Use: {}", COMMANDS));
    };

    match command.as_str() {
        "add-book" => parse_add_book(args),
        "add-reader" => {
            if args.len() < 2 {
                return Err("'add-reader' requires a name. Usage: add-reader <name>".to_string());
            }
            Ok(Command::AddReader { name: args[1..].join(" ") })
        }
        "borrow" => parse_loan(args).map(|(reader, book)| Command::Borrow { reader, book }),
        "return" => parse_loan(args).map(|(reader, book)| Command::Return { reader, book }),
        "evaluate" => parse_reader(args).map(|reader| Command::Evaluate { reader }),
        "recommend" => parse_reader(args).map(|reader| Command::Recommend { reader }),
        "profile" => parse_reader(args).map(|reader| Command::Profile { reader }),
        "list" => Ok(Command::List),
        "search" => {
            if args.len() < 2 {
                return Err("'search' requires a query. Usage: search <text>".to_string());
            }
            Ok(Command::Search { query: args[1..].join(" ") })
        }
        "popular" => {
            let limit = match args.get(1) {
                Some(n) => n.parse::<usize>().map_err(|_| format!("Invalid limit: '{}'", n))?,
                None => 5,
            };
            Ok(Command::Popular { limit })
        }
        _ => Err(format!("Unknown command: {}. Available: {}", command, COMMANDS)),
    }
}

/// Usage: add-book <title> <author> <copies> [category...]
fn parse_add_book(args: &[String]) -> Result<Command, String> {
    if args.len() < 4 {
        return Err("'add-book' requires a title, an author and a copy count. Usage: add-book <title> <author> <copies> [category...]".to_string());
    }

    let copies = args[3]
        .parse::<u32>()
        .map_err(|_| format!("Invalid copy count: '{}'", args[3]))?;
    let author = Some(args[2].clone()).filter(|a| !a.is_empty());

    Ok(Command::AddBook {
        title: args[1].clone(),
        author,
        copies,
        categories: args[4..].to_vec(),
    })
}

fn parse_id(arg: &str, what: &str) -> Result<u64, String> {
    arg.parse::<u64>().map_err(|_| format!("Invalid {} id: '{}'", what, arg))
}

/// Usage: <command> <reader_id>
fn parse_reader(args: &[String]) -> Result<ReaderId, String> {
    if args.len() < 2 {
        return Err(format!("'{}' requires a reader id. Usage: {} <reader_id>", args[0], args[0]));
    }
    Ok(ReaderId(parse_id(&args[1], "reader")?))
}

/// Usage: <command> <reader_id> <book_id>
fn parse_loan(args: &[String]) -> Result<(ReaderId, BookId), String> {
    if args.len() < 3 {
        return Err(format!("'{}' requires a reader id and a book id. Usage: {} <reader_id> <book_id>", args[0], args[0]));
    }
    Ok((ReaderId(parse_id(&args[1], "reader")?), BookId(parse_id(&args[2], "book")?)))
}

/// Single-command mode - load the library from path, execute command, save back
/// Usage: libcirc <data_path> <command> [args...]
///
/// The store is saved even when the command is refused, since the evaluation
/// that runs first may already have issued or lifted penalties.
pub fn run_single_command(config: LibraryConfig, data_path: &str, args: &[String]) -> Result<(), String> {
    let command = parse_command_from_args(args)?;

    let store = MemoryStore::load_or_create(data_path)
        .map_err(|e| format!("Error loading '{}': {}", data_path, e))?;
    let library = Library::new(store, Arc::new(SystemClock), config);

    let result = execute_command(&library, command);

    library
        .save(Path::new(data_path))
        .map_err(|e| format!("Error saving '{}': {}", data_path, e))?;
    result
}

fn execute_command(library: &Library<MemoryStore>, command: Command) -> Result<(), String> {
    match command {
        Command::AddBook { title, author, copies, categories } => {
            let book = library.add_book(NewBook { title, author, copies, categories, ..NewBook::default() });
            println!("Added book {}: {}", book.id, book.title);
        }

        Command::AddReader { name } => {
            let reader = library.register_reader(name);
            println!("Registered reader {}: {}", reader.id, reader.name);
        }

        Command::Borrow { reader, book } => {
            library.evaluate(reader).map_err(|e| e.to_string())?;
            let loan = library.borrow(reader, book).map_err(|e| e.to_string())?;
            println!("Loan {} created, due {}", loan.id, loan.due_at);
        }

        Command::Return { reader, book } => {
            library.evaluate(reader).map_err(|e| e.to_string())?;
            let loan = library.return_book(reader, book).map_err(|e| e.to_string())?;
            println!("Loan {} returned", loan.id);
        }

        Command::Evaluate { reader } => {
            let evaluation = library.evaluate(reader).map_err(|e| e.to_string())?;
            println!(
                "{} penalties lifted, {} penalties issued",
                evaluation.lifted.len(),
                evaluation.issued.len()
            );
        }

        Command::Recommend { reader } => {
            library.evaluate(reader).map_err(|e| e.to_string())?;
            let books = library.recommend_books(reader);
            if books.is_empty() {
                println!("No recommendations");
            }
            for book in books {
                println!("  {}: {}", book.id, book.title);
            }
        }

        Command::Profile { reader } => {
            library.evaluate(reader).map_err(|e| e.to_string())?;
            let profile = library.profile(reader).map_err(|e| e.to_string())?;
            println!("Reader {}: {} ({} active loans)", profile.reader.id, profile.reader.name, profile.reader.active_loans);
            for active in &profile.loans {
                let title = active.book.as_ref().map_or("<removed>", |b| b.title.as_str());
                println!("  {} due {}", title, active.loan.due_at);
            }
            if let Some(until) = profile.penalty_until {
                println!("Penalized until {}", until);
            }
        }

        Command::List => {
            let books = library.books();
            if books.is_empty() {
                println!("Catalog is empty");
            } else {
                for book in &books {
                    println!("  {}: {} ({}/{} available)", book.id, book.title, book.available_copies, book.total_copies);
                }
                println!("Total: {} books", books.len());
            }
        }

        Command::Search { query } => {
            for book in library.search(&query) {
                println!("  {}: {}", book.id, book.title);
            }
        }

        Command::Popular { limit } => {
            for (rank, popular) in library.popular(limit).iter().enumerate() {
                println!("{}. {} ({} loans)", rank + 1, popular.book.title, popular.loans);
            }
        }
    }

    Ok(())
}
