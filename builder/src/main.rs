use mstmap::config::PipelineConfig;
use mstmap::pipeline::Pipeline;

use log::info;
use std::time::Instant;

use clap::Parser;
#[derive(Parser, Debug)] #[command(author, version, about, long_about = None)]
struct Args {

    //Pipeline configuration (yaml), defaults are used when absent
    #[arg(short, long)]
    config: Option<String>,

    //Which task to carry out: index, layout, plot, run, query or write-config
    #[arg(short, long)]
    task: String,

    //Overrides the input pattern from the config
    #[arg(short, long)]
    input: Option<String>,

    //Overrides the output directory from the config
    #[arg(short, long)]
    output_dir: Option<String>,

    //Entry label if task is query
    #[arg(short, long)]
    label: Option<String>,

    //Number of neighbours if task is query
    #[arg(short, default_value_t = 10)]
    k: usize,

    //Destination if task is write-config
    #[arg(long, default_value = "mstmap.yaml")]
    config_out: String,

    //Print query results as json instead of yaml
    #[arg(long)]
    json: bool,
}

fn load_config(args: &Args) -> Result<PipelineConfig, Box<dyn std::error::Error>> {

    let mut config = match &args.config {
        Some(filename) => PipelineConfig::from_file(filename)?,
        None => PipelineConfig::default(),
    };

    if let Some(input) = &args.input {
        config.input = input.clone();
    }
    if let Some(output_dir) = &args.output_dir {
        config.output_dir = output_dir.clone();
    }

    config.validate()?;
    return Ok(config);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {

    env_logger::init();

    let args = Args::parse();
    let start = Instant::now();

    match args.task.as_str() {
        "write-config" => {
            PipelineConfig::default().to_file(&args.config_out)?;
            info!("Wrote default configuration to {}", &args.config_out);
        },
        "index" => {
            let mut pipeline = Pipeline::new(load_config(&args)?)?;
            pipeline.index()?;
        },
        "layout" => {
            let mut pipeline = Pipeline::new(load_config(&args)?)?;
            pipeline.index()?;
            pipeline.layout()?;
        },
        "plot" => {
            //reuse the stored forest and properties when they exist
            let mut config = load_config(&args)?;
            config.restore_index = true;
            let mut pipeline = Pipeline::new(config)?;
            for path in pipeline.run()? {
                println!("{}", path.display());
            }
        },
        "run" => {
            let mut pipeline = Pipeline::new(load_config(&args)?)?;
            for path in pipeline.run()? {
                println!("{}", path.display());
            }
        },
        "query" => {
            let label = match &args.label {
                Some(l) => l.clone(),
                None => return Err("--label is required for query".into()),
            };
            let mut config = load_config(&args)?;
            config.restore_index = true;
            let mut pipeline = Pipeline::new(config)?;
            pipeline.index()?;

            let neighbors = pipeline.query(&label, args.k)?;
            match args.json {
                true => println!("{}", neighbors.to_json()?),
                false => print!("{}", neighbors.to_yaml()?),
            }
        },
        _ => return Err(format!("Unknown task: {}", args.task).into()),
    }

    info!("{}: {}", &args.task, start.elapsed().as_secs_f64());
    Ok(())
}
