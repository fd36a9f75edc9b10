//! Interactive shell for a disk-based B+ tree.
//!
//! Reads commands from standard input and dispatches on the first
//! character, e.g. `o tree.db` to open a file, `i 42 hello` to insert,
//! `f 42` to look a key up, `t` to print the tree. See `?` for the full
//! command list.

use anyhow::Result;
use clap::Parser;
use diskbpt::{join, Config, Db, TreeNode};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(
    name = "bpt",
    version = VERSION,
    about = "Disk-based B+ tree shell"
)]
struct Cli {
    /// Tree file to open at startup with default orders
    file: Option<PathBuf>,
}

/// Whether the command loop should keep going
enum Flow {
    Continue,
    Quit,
}

struct Shell {
    db: Option<Db>,
    verbose: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut shell = Shell {
        db: None,
        verbose: false,
    };

    println!("bpt {} -- disk-based B+ tree shell", VERSION);
    usage();

    if let Some(path) = cli.file {
        shell.open(&path.display().to_string(), None, None, true);
    }

    let mut rl = DefaultEditor::new()?;
    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);
                if let Flow::Quit = shell.dispatch(trimmed, false, true, true) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Error: {:?}", e);
                break;
            }
        }
    }
    println!();

    Ok(())
}

impl Shell {
    /// Execute one command line. `echo` and `respond` mirror the script
    /// execution flags; `help` enables usage hints for interactive typos.
    fn dispatch(&mut self, line: &str, echo: bool, respond: bool, help: bool) -> Flow {
        let instruction = match line.chars().next() {
            Some(c) => c,
            None => return Flow::Continue,
        };

        if instruction == '#' {
            if line.len() < 3 {
                println!();
            } else {
                println!("{}", &line[2..]);
            }
            return Flow::Continue;
        }

        if echo {
            println!("> {}", line);
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        match instruction {
            'q' => return Flow::Quit,
            'o' => self.cmd_open(&tokens, respond, help),
            'c' => self.cmd_close(respond),
            'j' => self.cmd_join(&tokens, respond, help),
            'v' => {
                self.verbose = !self.verbose;
                if respond {
                    if self.verbose {
                        println!("Verbose output enabled.");
                    } else {
                        println!("Verbose output disabled.");
                    }
                }
            }
            'e' => self.cmd_execute(&tokens, respond),
            'i' | 'd' | 'f' | 'p' | 'l' | 't' | 'x' => {
                if self.db.is_none() {
                    if respond {
                        println!(
                            "No tree file is open. Please open a file first with 'o <filepath>'."
                        );
                    }
                    return Flow::Continue;
                }
                self.cmd_tree_op(instruction, &tokens, respond, help);
            }
            '?' => usage(),
            _ => {
                if help {
                    usage();
                }
            }
        }
        Flow::Continue
    }

    fn cmd_open(&mut self, tokens: &[&str], respond: bool, help: bool) {
        if self.db.is_some() {
            if respond {
                println!("A tree file is already open. Please close it first with 'c'.");
            }
            return;
        }
        let Some(path) = tokens.get(1) else {
            if help {
                usage();
            }
            return;
        };
        let leaf_order = tokens.get(2).and_then(|t| t.parse().ok());
        let internal_order = tokens.get(3).and_then(|t| t.parse().ok());
        self.open(path, leaf_order, internal_order, respond);
    }

    fn open(&mut self, path: &str, leaf_order: Option<i32>, internal_order: Option<i32>, respond: bool) {
        let mut config = Config::new(path);
        if let Some(order) = leaf_order {
            config = config.leaf_order(order);
        }
        if let Some(order) = internal_order {
            config = config.internal_order(order);
        }
        match Db::open(config) {
            Ok(db) => {
                self.db = Some(db);
                if respond {
                    println!("File '{}' opened.", path);
                }
            }
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    fn cmd_close(&mut self, respond: bool) {
        if self.db.take().is_some() {
            if respond {
                println!("Tree file closed.");
            }
        } else if respond {
            println!("No tree file is open.");
        }
    }

    fn cmd_join(&mut self, tokens: &[&str], respond: bool, help: bool) {
        if self.db.is_some() {
            if respond {
                println!("A tree file is already open. Please close it first with 'c'.");
            }
            return;
        }
        let (Some(path1), Some(path2), Some(out_path)) =
            (tokens.get(1), tokens.get(2), tokens.get(3))
        else {
            if help {
                usage();
            }
            return;
        };

        let result = Db::open(Config::new(*path1))
            .and_then(|a| Db::open(Config::new(*path2)).map(|b| (a, b)))
            .and_then(|(a, b)| join(&a, &b, out_path));
        match result {
            Ok(_) => {
                if respond {
                    println!("Files '{}' and '{}' joined into '{}'.", path1, path2, out_path);
                }
            }
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    fn cmd_execute(&mut self, tokens: &[&str], respond: bool) {
        let Some(path) = tokens.get(1) else {
            return;
        };
        let echo = tokens.get(2).map(|t| *t == "1").unwrap_or(false);
        let script_respond = tokens.get(3).map(|t| *t == "1").unwrap_or(false);

        let file = match File::open(path) {
            Ok(file) => file,
            Err(_) => {
                if respond {
                    eprintln!("Error: Could not open command file '{}'.", path);
                }
                return;
            }
        };
        for line in BufReader::new(file).lines() {
            match line {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    // 'q' inside a script is ignored, as is an unknown command.
                    self.dispatch(trimmed, echo, script_respond, false);
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return;
                }
            }
        }
    }

    fn cmd_tree_op(&mut self, instruction: char, tokens: &[&str], respond: bool, help: bool) {
        let Some(db) = &self.db else {
            return;
        };

        let key: Option<i64> = tokens.get(1).and_then(|t| t.parse().ok());
        let result = match (instruction, key) {
            ('i', Some(key)) => {
                let value = tokens.get(2).map(|t| t.to_string()).unwrap_or_else(|| key.to_string());
                db.insert(key, value.as_bytes()).map(|()| {
                    if respond {
                        self.print_tree();
                    }
                })
            }
            ('d', Some(key)) => db.delete(key).map(|()| {
                if respond {
                    self.print_tree();
                }
            }),
            ('f', Some(key)) => db.find(key).map(|found| match found {
                Some(record) => println!("({}, {})", key, record),
                None => println!("Not found."),
            }),
            ('p', Some(key)) => db.trace_find(key).map(|(found, trace)| {
                for line in trace {
                    println!("{}", line);
                }
                match found {
                    Some(record) => println!("({}, {})", key, record),
                    None => println!("Not found."),
                }
            }),
            ('l', _) => self.print_leaves(),
            ('t', _) => {
                self.print_tree();
                Ok(())
            }
            ('x', _) => db.destroy().map(|()| {
                if respond {
                    println!("Tree destroyed.");
                }
            }),
            _ => {
                if help {
                    usage();
                }
                Ok(())
            }
        };
        if let Err(e) = result {
            eprintln!("Error: {}", e);
        }
    }

    /// Print the tree breadth-first, one line per level; page numbers are
    /// shown when verbose.
    fn print_tree(&self) {
        let Some(db) = &self.db else {
            return;
        };
        let root = match db.export_tree() {
            Ok(Some(root)) => root,
            Ok(None) => {
                println!("Empty tree.");
                return;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                return;
            }
        };

        let mut queue: VecDeque<(TreeNode, usize)> = VecDeque::new();
        queue.push_back((root, 0));
        let mut rank = 0;
        while let Some((node, node_rank)) = queue.pop_front() {
            if node_rank != rank {
                rank = node_rank;
                println!();
            }
            if self.verbose {
                print!("page {}: ", node.page_no);
            }
            for key in &node.keys {
                print!("{} ", key);
            }
            print!("| ");
            for child in node.children {
                queue.push_back((child, node_rank + 1));
            }
        }
        println!();
    }

    /// Print every leaf entry, left to right along the sibling chain
    fn print_leaves(&self) -> diskbpt::Result<()> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        let entries = db.iter()?;
        if entries.is_empty() {
            println!("Empty tree.");
            return Ok(());
        }
        for (key, record) in entries {
            print!("({}, {}) ", key, record);
        }
        println!();
        Ok(())
    }
}

fn usage() {
    println!(
        "Enter any of the following commands after the prompt > :\n\
         \to <path> [l_ord] [i_ord] -- Open a tree file. Create it if it does not exist.\n\
         \tc -- Close the current tree file.\n\
         \tj <tree_path1> <tree_path2> <out_path> -- Join two tree files into a new output file.\n\
         \ti <k> [v] -- Insert key <k> (an integer) with value <v> (a string up to 119 chars; default: <k>).\n\
         \te <filepath> [echo] [resp] -- Execute commands from a file (0 for false, 1 for true, default 0).\n\
         \tf <k> -- Find the value under key <k>.\n\
         \tp <k> -- Print the path from the root to key <k> and its associated value.\n\
         \td <k> -- Delete key <k> and its associated value.\n\
         \tx -- Destroy the whole tree. Start again with an empty tree of the same order.\n\
         \tt -- Print the B+ tree.\n\
         \tl -- Print the keys of the leaves (bottom row of the tree).\n\
         \tv -- Toggle output of page numbers (\"verbose\") in tree printing.\n\
         \tq -- Quit. (Or use Ctrl-D.)\n\
         \t? -- Print this help message."
    );
}
