use std::env;
use std::error::Error;
use std::fs;
use std::io::{self, Read};
use std::process;
use std::rc::Rc;
use cindex::ast::Tree;
use cindex::config::{Config, FileSystem, Language};
use cindex::symbols::SymbolMap;

fn main() -> Result<(), Box<dyn Error>> {
    let mut config = Config::cpp();
    let mut input = None;
    for arg in env::args().skip(1) {
        if arg == "--c" {
            config = Config { language: Language::C, ..config };
        } else if arg == "--structural" {
            config = config.structural();
        } else if let Some(dir) = arg.strip_prefix("-I") {
            config = config.include_path(dir);
        } else if let Some(define) = arg.strip_prefix("-D") {
            let (name, value) = define.split_once('=').unwrap_or((define, "1"));
            config = config.define(name, value);
        } else if arg.starts_with('-') && arg != "-" {
            eprintln!("usage: cindex [--c] [--structural] [-I<dir>] [-D<name>[=<value>]] [file]");
            process::exit(2);
        } else {
            input = Some(arg);
        }
    }

    let (name, text) = match input {
        Some(ref path) if path != "-" => { (path.clone(), fs::read(path)?) }
        _ => {
            let mut text = Vec::default();
            io::stdin().read_to_end(&mut text)?;
            ("<stdin>".to_owned(), text)
        }
    };

    let symbols = &SymbolMap::default();
    let source = &FileSystem::new(&config);
    let mut tree = Tree::default();
    let unit = match cindex::parse(symbols, &config, source, &name, Rc::from(text), &mut tree) {
        Ok(unit) => { unit }
        Err(failure) => {
            print!("{}", tree.finish());
            eprintln!("{}: {}", name, failure);
            process::exit(1);
        }
    };

    print!("{}", tree.finish());
    for problem in &unit.problems {
        let file = unit.files.get(problem.loc.file.0 as usize).map_or("?", |file| &file[..]);
        eprintln!("{}: {}", file, problem);
    }

    Ok(())
}
