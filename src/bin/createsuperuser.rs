use bcrypt::{hash, DEFAULT_COST};
use dotenvy::dotenv;
use sqlx::{postgres::PgPoolOptions, Row};
use std::io::{self, Write};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🛡️  Jurisflow - Create Superuser");
    println!("==========================================");

    // Load environment variables
    dotenv().ok();

    // Connect to database
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set in .env file");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    print!("Nome do escritório: ");
    io::stdout().flush()?;
    let mut escritorio = String::new();
    io::stdin().read_line(&mut escritorio)?;
    let escritorio = escritorio.trim().to_string();

    if escritorio.is_empty() {
        eprintln!("❌ O nome do escritório não pode ser vazio");
        return Ok(());
    }

    print!("E-mail: ");
    io::stdout().flush()?;
    let mut email = String::new();
    io::stdin().read_line(&mut email)?;
    let email = email.trim().to_string();

    if email.is_empty() || !email.contains('@') {
        eprintln!("❌ E-mail inválido");
        return Ok(());
    }

    print!("Nome: ");
    io::stdout().flush()?;
    let mut nome = String::new();
    io::stdin().read_line(&mut nome)?;
    let nome = nome.trim().to_string();

    if nome.is_empty() {
        eprintln!("❌ O nome não pode ser vazio");
        return Ok(());
    }

    // Check if user already exists
    let existing_user = sqlx::query("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&pool)
        .await?;

    if existing_user.is_some() {
        eprintln!("❌ Já existe um usuário com este e-mail");
        return Ok(());
    }

    let password = rpassword::prompt_password("Senha: ")?;
    if password.len() < 6 {
        eprintln!("❌ A senha precisa de pelo menos 6 caracteres");
        return Ok(());
    }
    let confirm = rpassword::prompt_password("Senha (confirmação): ")?;
    if password != confirm {
        eprintln!("❌ As senhas não conferem");
        return Ok(());
    }

    let password_hash = hash(&password, DEFAULT_COST)?;

    let mut tx = pool.begin().await?;

    let escritorio_id: i32 = sqlx::query(
        "INSERT INTO escritorios (nome, created_at, updated_at) VALUES ($1, NOW(), NOW()) RETURNING id",
    )
    .bind(&escritorio)
    .fetch_one(&mut *tx)
    .await?
    .get(0);

    let user_id: i32 = sqlx::query(
        "INSERT INTO users (escritorio_id, email, nome, password_hash, is_active, is_superuser, created_at, updated_at)
         VALUES ($1, $2, $3, $4, true, true, NOW(), NOW())
         RETURNING id",
    )
    .bind(escritorio_id)
    .bind(&email)
    .bind(&nome)
    .bind(&password_hash)
    .fetch_one(&mut *tx)
    .await?
    .get(0);

    tx.commit().await?;

    println!();
    println!("✅ Superusuário criado com sucesso");
    println!("   escritório: {} (id {})", escritorio, escritorio_id);
    println!("   usuário:    {} (id {})", email, user_id);

    Ok(())
}
